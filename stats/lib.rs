#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Voxel-wise statistics over an observations × voxels matrix.
//!
//! A [`VoxelMatrix`] is built from volumetric data through a [`MaskingAdapter`]
//! and then handed to one of the engines:
//!
//! - [`regress`]: vectorised ordinary least squares over every voxel at once.
//! - [`one_sample_ttest`]: per-voxel two-sided one-sample t-test with optional
//!   uncorrected thresholding.
//! - [`similarity`]: pattern expression of each observation against a reference map.
//! - [`predict`](predict::predict): full-sample and cross-validated fits of a
//!   pluggable [`Estimator`](predict::Estimator), with per-fold weight maps.
//!
//! Engines never mutate their inputs; every output is a fresh instance with its
//! own numeric payload.

pub mod config;
pub mod design;
pub mod error;
pub mod linalg;
pub mod mask;
pub mod matrix;
pub mod predict;
pub mod regress;
pub mod similarity;
pub mod ttest;

pub use config::Config;
pub use design::Design;
pub use error::{Error, Result};
pub use mask::{BinaryMask, MaskingAdapter, Volume};
pub use matrix::VoxelMatrix;
pub use predict::{Estimator, PredictOptions, PredictionOutput, predict};
pub use regress::{RegressionResult, regress, regress_with_config};
pub use similarity::{SimilarityMethod, similarity};
pub use ttest::{Threshold, TtestResult, one_sample_ttest};
