use crate::error::{Error, Result};
use crate::matrix::VoxelMatrix;
use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an observation is scored against a reference pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    DotProduct,
    Correlation,
}

impl FromStr for SimilarityMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dot_product" => Ok(Self::DotProduct),
            "correlation" => Ok(Self::Correlation),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown similarity method '{other}'; expected 'dot_product' or 'correlation'"
            ))),
        }
    }
}

impl fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DotProduct => "dot_product",
            Self::Correlation => "correlation",
        })
    }
}

/// Pattern expression of every observation of `matrix` against `reference`.
///
/// Returns one score per observation, in row order. Zero-variance rows score
/// NaN under [`SimilarityMethod::Correlation`].
pub fn similarity(
    matrix: &VoxelMatrix,
    reference: &VoxelMatrix,
    method: SimilarityMethod,
) -> Result<Array1<f64>> {
    if reference.rows() != 1 {
        return Err(Error::InvalidInput(format!(
            "the reference pattern must be a single observation, found {}",
            reference.rows()
        )));
    }
    if matrix.voxel_count() != reference.voxel_count() {
        log::warn!(
            "Different number of voxels detected ({} vs {}); no resampling path is available.",
            matrix.voxel_count(),
            reference.voxel_count()
        );
        return Err(Error::shape(
            "similarity reference",
            matrix.voxel_count(),
            reference.voxel_count(),
        ));
    }

    let reference_data = reference.data();
    let pattern = reference_data.row(0);
    let scores = match method {
        SimilarityMethod::DotProduct => matrix.data().dot(&pattern),
        SimilarityMethod::Correlation => {
            Zip::from(matrix.data().rows()).par_map_collect(|row| pearson(row, pattern))
        }
    };
    log::debug!("Scored {} observations by {method}", scores.len());
    Ok(scores)
}

/// Pearson correlation; NaN when either side has zero variance.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len();
    if n == 0 || n != b.len() {
        return f64::NAN;
    }
    let mean_a = a.sum() / n as f64;
    let mean_b = b.sum() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    cov / (var_a * var_b).sqrt()
}
