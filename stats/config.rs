//! Engine configuration, read from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! [prediction]
//! parallel_folds = true
//! compute_metrics = true
//! algorithm = { name = "ridge", alpha = 1.0 }
//!
//! [ttest]
//! threshold = { uncorrected = 0.001 }
//!
//! [cross_validation]
//! n_folds = 5
//! seed = 42
//!
//! [linalg]
//! rcond = 1e-12
//! ```

use crate::linalg::DEFAULT_RCOND;
use crate::predict::Algorithm;
use crate::ttest::Threshold;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub prediction: PredictionConfig,
    pub ttest: TtestConfig,
    pub cross_validation: CrossValidationConfig,
    pub linalg: LinalgConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Fit cross-validation folds on the rayon pool.
    pub parallel_folds: bool,
    /// Compute accuracy or RMSE/correlation summaries.
    pub compute_metrics: bool,
    pub algorithm: Algorithm,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            parallel_folds: true,
            compute_metrics: true,
            algorithm: Algorithm::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtestConfig {
    pub threshold: Option<Threshold>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub n_folds: usize,
    pub seed: Option<u64>,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinalgConfig {
    /// Singular values below `rcond * max_singular_value` are treated as zero.
    pub rcond: f64,
}

impl Default for LinalgConfig {
    fn default() -> Self {
        Self {
            rcond: DEFAULT_RCOND,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cross_validation.n_folds < 2 {
            return Err(ConfigError::InvalidValue(format!(
                "cross_validation.n_folds must be at least 2, found {}",
                self.cross_validation.n_folds
            )));
        }
        if !(self.linalg.rcond > 0.0 && self.linalg.rcond < 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "linalg.rcond must lie in (0, 1), found {}",
                self.linalg.rcond
            )));
        }
        Ok(())
    }
}
