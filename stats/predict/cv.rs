//! Cross-validation schemes.
//!
//! A scheme turns an observation count into a list of [`Fold`]s. The engine
//! accepts any [`CrossValidation`] implementor, including a plain `Vec<Fold>`
//! supplied by the caller; every fold list goes through [`validate_folds`]
//! before anything is fitted.

use crate::config::Config;
use crate::error::{Error, Result};
use itertools::Itertools;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// One train/test split. Indices refer to rows of the voxel matrix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

pub trait CrossValidation: Sync {
    fn folds(&self, n_obs: usize) -> Result<Vec<Fold>>;
}

impl CrossValidation for Vec<Fold> {
    fn folds(&self, n_obs: usize) -> Result<Vec<Fold>> {
        validate_folds(self, n_obs)?;
        Ok(self.clone())
    }
}

/// Built-in splitting strategies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CvScheme {
    /// Contiguous k-fold, optionally shuffled with a fixed seed.
    KFold { n_folds: usize, seed: Option<u64> },
    /// K-fold over groups (e.g. subjects): a group never straddles train and test.
    GroupKFold { n_folds: usize, groups: Vec<u64> },
    /// One fold per group, holding that group out.
    LeaveOneGroupOut { groups: Vec<u64> },
}

impl CvScheme {
    /// K-fold with the fold count and seed configured under `[cross_validation]`.
    pub fn k_fold_from_config(config: &Config) -> Self {
        Self::KFold {
            n_folds: config.cross_validation.n_folds,
            seed: config.cross_validation.seed,
        }
    }
}

impl CrossValidation for CvScheme {
    fn folds(&self, n_obs: usize) -> Result<Vec<Fold>> {
        let folds = match self {
            Self::KFold { n_folds, seed } => k_fold(n_obs, *n_folds, *seed)?,
            Self::GroupKFold { n_folds, groups } => group_k_fold(n_obs, *n_folds, groups)?,
            Self::LeaveOneGroupOut { groups } => leave_one_group_out(n_obs, groups)?,
        };
        validate_folds(&folds, n_obs)?;
        log::debug!("{self:?} produced {} folds over {n_obs} observations", folds.len());
        Ok(folds)
    }
}

fn k_fold(n_obs: usize, n_folds: usize, seed: Option<u64>) -> Result<Vec<Fold>> {
    if n_folds < 2 || n_folds > n_obs {
        return Err(Error::InvalidConfiguration(format!(
            "k-fold needs 2 <= n_folds <= observations, found n_folds = {n_folds} for {n_obs} observations"
        )));
    }
    let mut order: Vec<usize> = (0..n_obs).collect();
    if let Some(seed) = seed {
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);
    }

    let base = n_obs / n_folds;
    let extra = n_obs % n_folds;
    let mut assignment = vec![0usize; n_obs];
    let mut start = 0;
    for fold in 0..n_folds {
        let size = base + usize::from(fold < extra);
        for &obs in &order[start..start + size] {
            assignment[obs] = fold;
        }
        start += size;
    }
    Ok(folds_from_assignment(&assignment, n_folds))
}

fn check_groups(n_obs: usize, groups: &[u64]) -> Result<Vec<u64>> {
    if groups.len() != n_obs {
        return Err(Error::InvalidConfiguration(format!(
            "group vector has {} entries for {n_obs} observations",
            groups.len()
        )));
    }
    Ok(groups.iter().copied().sorted_unstable().dedup().collect())
}

fn group_k_fold(n_obs: usize, n_folds: usize, groups: &[u64]) -> Result<Vec<Fold>> {
    let unique = check_groups(n_obs, groups)?;
    if n_folds < 2 || n_folds > unique.len() {
        return Err(Error::InvalidConfiguration(format!(
            "group k-fold needs 2 <= n_folds <= groups, found n_folds = {n_folds} for {} groups",
            unique.len()
        )));
    }

    // Largest groups first, each into the currently lightest fold.
    let counts = groups.iter().copied().counts();
    let by_size: Vec<u64> = unique
        .iter()
        .copied()
        .sorted_by(|a, b| counts[b].cmp(&counts[a]).then(a.cmp(b)))
        .collect();
    let mut fold_sizes = vec![0usize; n_folds];
    let mut group_fold = std::collections::HashMap::with_capacity(unique.len());
    for group in by_size {
        let lightest = (0..n_folds)
            .min_by_key(|&f| (fold_sizes[f], f))
            .unwrap_or(0);
        fold_sizes[lightest] += counts[&group];
        group_fold.insert(group, lightest);
    }

    let assignment: Vec<usize> = groups.iter().map(|g| group_fold[g]).collect();
    Ok(folds_from_assignment(&assignment, n_folds))
}

fn leave_one_group_out(n_obs: usize, groups: &[u64]) -> Result<Vec<Fold>> {
    let unique = check_groups(n_obs, groups)?;
    if unique.len() < 2 {
        return Err(Error::InvalidConfiguration(
            "leave-one-group-out needs at least two distinct groups".to_string(),
        ));
    }
    let assignment: Vec<usize> = groups
        .iter()
        .map(|g| unique.binary_search(g).unwrap_or(0))
        .collect();
    Ok(folds_from_assignment(&assignment, unique.len()))
}

fn folds_from_assignment(assignment: &[usize], n_folds: usize) -> Vec<Fold> {
    (0..n_folds)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..assignment.len()).partition(|&obs| assignment[obs] == fold);
            Fold { train, test }
        })
        .collect()
}

/// Checks that a fold list can be evaluated without leakage: indices in range,
/// non-empty train and test sets, no overlap between a fold's train and test
/// rows, and test sets that partition every observation exactly once.
pub fn validate_folds(folds: &[Fold], n_obs: usize) -> Result<()> {
    if folds.is_empty() {
        return Err(Error::InvalidConfiguration(
            "cross-validation produced no folds".to_string(),
        ));
    }
    let mut tested = vec![false; n_obs];
    for (k, fold) in folds.iter().enumerate() {
        if fold.train.is_empty() || fold.test.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "fold {k} has an empty train or test set"
            )));
        }
        let mut in_train = vec![false; n_obs];
        for &obs in &fold.train {
            if obs >= n_obs {
                return Err(Error::InvalidConfiguration(format!(
                    "fold {k} references observation {obs} of {n_obs}"
                )));
            }
            in_train[obs] = true;
        }
        for &obs in &fold.test {
            if obs >= n_obs {
                return Err(Error::InvalidConfiguration(format!(
                    "fold {k} references observation {obs} of {n_obs}"
                )));
            }
            if in_train[obs] {
                return Err(Error::InvalidConfiguration(format!(
                    "fold {k} uses observation {obs} for both training and testing"
                )));
            }
            if tested[obs] {
                return Err(Error::InvalidConfiguration(format!(
                    "observation {obs} is held out by more than one fold"
                )));
            }
            tested[obs] = true;
        }
    }
    if let Some(missing) = tested.iter().position(|&t| !t) {
        return Err(Error::InvalidConfiguration(format!(
            "observation {missing} is never held out"
        )));
    }
    Ok(())
}
