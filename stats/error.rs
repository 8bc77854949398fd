use crate::linalg::FaerLinalgError;
use crate::mask::MaskError;
use crate::predict::EstimatorError;
use polars::prelude::PolarsError;
use thiserror::Error;

/// Every failure the engines can surface. All of them abort the requested
/// computation; no partial results are returned alongside an error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shape mismatch in {context}: expected {expected}, found {found}.")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid design matrix: {0}")]
    InvalidDesign(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("'{0}' is declared but not implemented.")]
    NotImplemented(&'static str),

    #[error("Estimator failed: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("Masking failed: {0}")]
    Mask(#[from] MaskError),

    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(context: &'static str, expected: usize, found: usize) -> Self {
        Self::ShapeMismatch {
            context,
            expected,
            found,
        }
    }
}
