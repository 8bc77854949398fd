use crate::linalg::FaerLinalgError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("{0} has not been fitted yet.")]
    NotFitted(String),

    #[error("{estimator} does not provide {capability}.")]
    Unsupported {
        estimator: String,
        capability: &'static str,
    },

    #[error("Invalid training labels: {0}")]
    InvalidLabels(String),

    #[error("Expected {expected} features or outputs, found {found}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid hyperparameter: {0}")]
    InvalidParameter(String),

    #[error("Iterative fit did not converge within {iterations} iterations (last change {last_change:.3e}).")]
    DidNotConverge { iterations: usize, last_change: f64 },

    #[error("Linear algebra failure inside the estimator: {0}")]
    Linalg(#[from] FaerLinalgError),
}

/// What kind of target an estimator predicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    Classification,
    Regression,
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
        })
    }
}

/// Fitted coefficients, either directly in voxel space or in a latent
/// component space with the loadings needed to map them back.
#[derive(Clone, Debug, PartialEq)]
pub enum Coefficients {
    Voxel(Array1<f64>),
    Latent {
        /// `[components, voxels]`.
        loadings: Array2<f64>,
        /// One coefficient per component.
        coef: Array1<f64>,
    },
}

impl Coefficients {
    /// The per-voxel weight map. Latent coefficients are projected back
    /// through the loadings: `loadingsᵀ · coef`.
    pub fn into_weight_map(self) -> Result<Array1<f64>, EstimatorError> {
        match self {
            Self::Voxel(weights) => Ok(weights),
            Self::Latent { loadings, coef } => {
                if loadings.nrows() != coef.len() {
                    return Err(EstimatorError::DimensionMismatch {
                        expected: loadings.nrows(),
                        found: coef.len(),
                    });
                }
                Ok(loadings.t().dot(&coef))
            }
        }
    }
}

/// Capability contract consumed by the prediction engine.
///
/// Every estimator can be fitted, predict, and report an intercept and
/// coefficients. Margin-based classifiers additionally report
/// `uses_decision_boundary() == true` and implement
/// [`decision_function`](Self::decision_function); classifiers that are not
/// margin-based implement [`predict_proba`](Self::predict_proba). A margin-based
/// classifier that can also estimate probabilities says so through
/// [`probability_enabled`](Self::probability_enabled).
pub trait Estimator: Send {
    fn name(&self) -> &str;

    fn prediction_type(&self) -> PredictionType;

    fn uses_decision_boundary(&self) -> bool {
        false
    }

    fn probability_enabled(&self) -> bool {
        false
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError>;

    fn intercept(&self) -> Result<f64, EstimatorError>;

    fn coefficients(&self) -> Result<Coefficients, EstimatorError>;

    /// Signed distance of each row from the separating surface.
    fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        let _ = x;
        Err(EstimatorError::Unsupported {
            estimator: self.name().to_string(),
            capability: "decision_function",
        })
    }

    /// `[rows, classes]` class-membership probabilities.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, EstimatorError> {
        let _ = x;
        Err(EstimatorError::Unsupported {
            estimator: self.name().to_string(),
            capability: "predict_proba",
        })
    }
}

impl<E: Estimator + ?Sized> Estimator for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn prediction_type(&self) -> PredictionType {
        (**self).prediction_type()
    }

    fn uses_decision_boundary(&self) -> bool {
        (**self).uses_decision_boundary()
    }

    fn probability_enabled(&self) -> bool {
        (**self).probability_enabled()
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        (**self).fit(x, y)
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        (**self).predict(x)
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        (**self).intercept()
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        (**self).coefficients()
    }

    fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        (**self).decision_function(x)
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, EstimatorError> {
        (**self).predict_proba(x)
    }
}
