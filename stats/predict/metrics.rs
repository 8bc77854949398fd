use super::estimator::PredictionType;
use crate::similarity::pearson;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Fraction of positions where `predicted` equals `truth`.
pub fn accuracy(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let hits = truth
        .iter()
        .zip(predicted.iter())
        .filter(|(t, p)| t == p)
        .count();
    hits as f64 / truth.len() as f64
}

pub fn rmse(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let sse: f64 = truth
        .iter()
        .zip(predicted.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    (sse / truth.len() as f64).sqrt()
}

/// JSON has no NaN or infinity. Non-finite values are written as `null` and
/// read back as NaN.
pub(crate) mod non_finite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Summary statistics of a prediction run. `*_all` compare the full-sample
/// fit against the labels, `*_xval` the held-out predictions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metrics {
    Classification {
        #[serde(with = "non_finite_as_null")]
        accuracy_all: f64,
        accuracy_xval: Option<f64>,
    },
    Regression {
        #[serde(with = "non_finite_as_null")]
        rmse_all: f64,
        #[serde(with = "non_finite_as_null")]
        r_all: f64,
        rmse_xval: Option<f64>,
        r_xval: Option<f64>,
    },
}

impl Metrics {
    pub fn compute(
        prediction_type: PredictionType,
        truth: ArrayView1<f64>,
        yfit_all: ArrayView1<f64>,
        yfit_xval: Option<ArrayView1<f64>>,
    ) -> Self {
        match prediction_type {
            PredictionType::Classification => Self::Classification {
                accuracy_all: accuracy(truth, yfit_all),
                accuracy_xval: yfit_xval.map(|xval| accuracy(truth, xval)),
            },
            PredictionType::Regression => Self::Regression {
                rmse_all: rmse(truth, yfit_all),
                r_all: pearson(truth, yfit_all),
                rmse_xval: yfit_xval.map(|xval| rmse(truth, xval)),
                r_xval: yfit_xval.map(|xval| pearson(truth, xval)),
            },
        }
    }

    pub(crate) fn log(&self) {
        match self {
            Self::Classification {
                accuracy_all,
                accuracy_xval,
            } => {
                log::info!("overall accuracy: {accuracy_all:.2}");
                if let Some(xval) = accuracy_xval {
                    log::info!("overall cross-validated accuracy: {xval:.2}");
                }
            }
            Self::Regression {
                rmse_all,
                r_all,
                rmse_xval,
                r_xval,
            } => {
                log::info!("overall root mean squared error: {rmse_all:.2}");
                log::info!("overall correlation: {r_all:.2}");
                if let (Some(rmse_xval), Some(r_xval)) = (rmse_xval, r_xval) {
                    log::info!("overall cross-validated root mean squared error: {rmse_xval:.2}");
                    log::info!("overall cross-validated correlation: {r_xval:.2}");
                }
            }
        }
    }
}
