use super::estimator::PredictionType;
use super::metrics::Metrics;
use crate::matrix::VoxelMatrix;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Held-out results assembled from every fold. Per-observation arrays are
/// indexed like the input rows; per-fold entries follow fold order.
#[derive(Clone, Debug)]
pub struct CrossValidated {
    pub yfit: Array1<f64>,
    /// One intercept per fold.
    pub intercepts: Vec<f64>,
    /// `[folds, voxels]` weight maps.
    pub weight_maps: VoxelMatrix,
    pub probabilities: Option<Array2<f64>>,
    pub decision_distances: Option<Array1<f64>>,
}

impl CrossValidated {
    pub fn n_folds(&self) -> usize {
        self.intercepts.len()
    }
}

/// Everything a prediction run returns.
#[derive(Clone, Debug)]
pub struct PredictionOutput {
    pub estimator: String,
    pub prediction_type: PredictionType,
    /// Labels the estimator was trained on.
    pub y: Array1<f64>,
    pub yfit_all: Array1<f64>,
    pub intercept: f64,
    /// `[1, voxels]` weights of the full-sample fit.
    pub weight_map: VoxelMatrix,
    pub probabilities_all: Option<Array2<f64>>,
    pub decision_distances_all: Option<Array1<f64>>,
    pub cross_validation: Option<CrossValidated>,
    pub metrics: Option<Metrics>,
}

impl PredictionOutput {
    pub fn summary(&self) -> PredictionSummary {
        PredictionSummary {
            estimator: self.estimator.clone(),
            prediction_type: self.prediction_type,
            n_observations: self.y.len(),
            n_voxels: self.weight_map.voxel_count(),
            n_folds: self.cross_validation.as_ref().map(CrossValidated::n_folds),
            intercept: self.intercept,
            metrics: self.metrics.clone(),
        }
    }
}

/// Serializable digest of a [`PredictionOutput`] without the large arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub estimator: String,
    pub prediction_type: PredictionType,
    pub n_observations: usize,
    pub n_voxels: usize,
    pub n_folds: Option<usize>,
    #[serde(with = "super::metrics::non_finite_as_null")]
    pub intercept: f64,
    pub metrics: Option<Metrics>,
}
