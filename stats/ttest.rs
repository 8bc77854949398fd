//! Voxelwise one-sample t-tests.
//!
//! Each voxel's statistic is computed directly as `mean / (sd / √n)` with the
//! sample standard deviation (`n − 1` denominator), and tested two-sided
//! against Student's t with `n − 1` degrees of freedom. Zero-variance voxels
//! give a non-finite t instead of an error.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matrix::VoxelMatrix;
use crate::regress::two_sided_p;
use ndarray::{Axis, Zip};
use serde::{Deserialize, Serialize};
use statrs::distribution::StudentsT;
use std::collections::BTreeMap;

/// Multiple-comparison handling for [`one_sample_ttest`].
///
/// Parsed from a single-entry table such as `{ uncorrected = 0.001 }` or
/// `{ fdr = 0.05 }`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub enum Threshold {
    /// Voxels with `p > cutoff` get a NaN t-value.
    Uncorrected(f64),
    /// False-discovery-rate control. Not available; requesting it fails.
    Fdr(f64),
}

impl TryFrom<BTreeMap<String, f64>> for Threshold {
    type Error = Error;

    fn try_from(table: BTreeMap<String, f64>) -> Result<Self> {
        let mut entries = table.into_iter();
        let (key, cutoff) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(Error::InvalidConfiguration(
                    "threshold must have exactly one entry, e.g. {uncorrected = 0.001} or {fdr = 0.05}"
                        .to_string(),
                ));
            }
        };
        if !(cutoff > 0.0 && cutoff <= 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "threshold cutoff {cutoff} must lie in (0, 1]"
            )));
        }
        match key.as_str() {
            "uncorrected" | "unc" => Ok(Self::Uncorrected(cutoff)),
            "fdr" => Ok(Self::Fdr(cutoff)),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown threshold type '{other}'; expected 'uncorrected' or 'fdr'"
            ))),
        }
    }
}

impl From<Threshold> for BTreeMap<String, f64> {
    fn from(threshold: Threshold) -> Self {
        let (key, cutoff) = match threshold {
            Threshold::Uncorrected(cutoff) => ("uncorrected", cutoff),
            Threshold::Fdr(cutoff) => ("fdr", cutoff),
        };
        BTreeMap::from([(key.to_string(), cutoff)])
    }
}

impl Threshold {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for (key, value) in pairs {
            if table.insert(key.to_string(), value).is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "threshold key '{key}' given twice"
                )));
            }
        }
        Self::try_from(table)
    }
}

/// `[1, voxels]` t and p maps.
#[derive(Clone, Debug)]
pub struct TtestResult {
    pub t: VoxelMatrix,
    pub p: VoxelMatrix,
}

/// Two-sided one-sample t-test of every voxel against zero.
pub fn one_sample_ttest(matrix: &VoxelMatrix, threshold: Option<Threshold>) -> Result<TtestResult> {
    if let Some(Threshold::Fdr(q)) = threshold {
        log::debug!("FDR thresholding requested at q = {q}");
        return Err(Error::NotImplemented("fdr threshold"));
    }

    let n_obs = matrix.rows();
    if n_obs < 2 {
        return Err(Error::InvalidInput(format!(
            "a one-sample t-test needs at least 2 observations, found {n_obs}"
        )));
    }

    let data = matrix.data();
    let mean = data
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::InvalidInput("no observations".to_string()))?;
    let sd = data.std_axis(Axis(0), 1.0);
    let root_n = (n_obs as f64).sqrt();

    let mut t = mean.clone();
    Zip::from(&mut t)
        .and(&mean)
        .and(&sd)
        .for_each(|t_v, &m, &s| *t_v = m / (s / root_n));

    let df = (n_obs - 1) as f64;
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| Error::InvalidInput(format!("invalid degrees of freedom {df}: {e}")))?;
    let p = t.mapv(|value| two_sided_p(&dist, value));

    if let Some(Threshold::Uncorrected(cutoff)) = threshold {
        let mut masked = 0usize;
        Zip::from(&mut t).and(&p).for_each(|t_v, &p_v| {
            if p_v > cutoff {
                *t_v = f64::NAN;
                masked += 1;
            }
        });
        log::info!(
            "Uncorrected threshold p <= {cutoff}: {} of {} voxels survive",
            t.len() - masked,
            t.len()
        );
    }

    Ok(TtestResult {
        t: matrix.derive_row(t)?,
        p: matrix.derive_row(p)?,
    })
}

/// Runs [`one_sample_ttest`] with the threshold configured under `[ttest]`.
pub fn one_sample_ttest_with_config(matrix: &VoxelMatrix, config: &Config) -> Result<TtestResult> {
    one_sample_ttest(matrix, config.ttest.threshold)
}
