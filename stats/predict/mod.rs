//! # The prediction engine
//!
//! [`predict`] fits a pluggable [`Estimator`] to the labels of a
//! [`VoxelMatrix`], once on every observation and, optionally, once per
//! cross-validation fold on that fold's training rows only.
//!
//! Each fold gets a fresh estimator from the caller's factory and only ever
//! sees its own training rows, so held-out predictions never leak. Folds
//! are independent and run on the rayon pool unless
//! [`PredictOptions::parallel_folds`] is off; their results are written back
//! into pre-sized outputs by test index, so the result does not depend on the
//! order in which folds finish.

mod cv;
mod estimator;
mod metrics;
mod models;
mod output;
mod plot;

pub use cv::{CrossValidation, CvScheme, Fold, validate_folds};
pub use estimator::{Coefficients, Estimator, EstimatorError, PredictionType};
pub use metrics::{Metrics, accuracy, rmse};
pub use models::{
    Algorithm, LinearRegression, LogisticRegression, PrincipalComponentRegression, Ridge,
    RidgeClassifier,
};
pub use output::{CrossValidated, PredictionOutput, PredictionSummary};
pub use plot::{NoopPlotter, PlotKind, PredictionPlotter};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matrix::VoxelMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredictOptions {
    /// Fit folds concurrently on the rayon pool.
    pub parallel_folds: bool,
    /// Compute and log [`Metrics`].
    pub compute_metrics: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            parallel_folds: true,
            compute_metrics: true,
        }
    }
}

impl From<&Config> for PredictOptions {
    fn from(config: &Config) -> Self {
        Self {
            parallel_folds: config.prediction.parallel_folds,
            compute_metrics: config.prediction.compute_metrics,
        }
    }
}

/// Per-fold results before they are scattered back into observation order.
struct FoldFit {
    yfit: Array1<f64>,
    probabilities: Option<Array2<f64>>,
    decision_distances: Option<Array1<f64>>,
    intercept: f64,
    weights: Array1<f64>,
}

fn check_len(context: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::shape(context, expected, found))
    }
}

/// Probabilities and decision distances, as far as the estimator's kind
/// calls for them.
fn class_outputs<E: Estimator + ?Sized>(
    estimator: &E,
    x: ArrayView2<f64>,
) -> Result<(Option<Array2<f64>>, Option<Array1<f64>>)> {
    if estimator.prediction_type() == PredictionType::Regression {
        return Ok((None, None));
    }
    if !estimator.uses_decision_boundary() {
        return Ok((Some(estimator.predict_proba(x)?), None));
    }
    let decision = estimator.decision_function(x)?;
    check_len("decision distances", x.nrows(), decision.len())?;
    let probabilities = if estimator.probability_enabled() {
        Some(estimator.predict_proba(x)?)
    } else {
        None
    };
    Ok((probabilities, Some(decision)))
}

fn fit_fold<E, F>(factory: &F, x: ArrayView2<f64>, y: ArrayView1<f64>, fold: &Fold) -> Result<FoldFit>
where
    E: Estimator,
    F: Fn() -> E,
{
    let x_train = x.select(Axis(0), &fold.train);
    let y_train = y.select(Axis(0), &fold.train);
    let x_test = x.select(Axis(0), &fold.test);

    let mut estimator = factory();
    estimator.fit(x_train.view(), y_train.view())?;
    let yfit = estimator.predict(x_test.view())?;
    check_len("fold predictions", fold.test.len(), yfit.len())?;
    let (probabilities, decision_distances) = class_outputs(&estimator, x_test.view())?;
    if let Some(p) = &probabilities {
        check_len("fold probabilities", fold.test.len(), p.nrows())?;
    }

    Ok(FoldFit {
        yfit,
        probabilities,
        decision_distances,
        intercept: estimator.intercept()?,
        weights: estimator.coefficients()?.into_weight_map()?,
    })
}

fn cross_validate<E, F>(
    matrix: &VoxelMatrix,
    factory: &F,
    scheme: &dyn CrossValidation,
    options: &PredictOptions,
    n_classes: Option<usize>,
    with_decision: bool,
) -> Result<CrossValidated>
where
    E: Estimator,
    F: Fn() -> E + Sync,
{
    let n_obs = matrix.rows();
    let folds = scheme.folds(n_obs)?;
    validate_folds(&folds, n_obs)?;
    log::info!(
        "Cross-validating over {} folds ({})",
        folds.len(),
        if options.parallel_folds {
            "parallel"
        } else {
            "sequential"
        }
    );

    let x = matrix.data();
    let y = matrix.labels();
    let run = |fold: &Fold| fit_fold(factory, x, y, fold);
    let fits: Vec<FoldFit> = if options.parallel_folds {
        folds.par_iter().map(run).collect::<Result<Vec<_>>>()?
    } else {
        folds.iter().map(run).collect::<Result<Vec<_>>>()?
    };

    let voxels = matrix.voxel_count();
    let mut yfit = Array1::from_elem(n_obs, f64::NAN);
    let mut probabilities = n_classes.map(|c| Array2::from_elem((n_obs, c), f64::NAN));
    let mut decision_distances = with_decision.then(|| Array1::from_elem(n_obs, f64::NAN));
    let mut weight_rows = Array2::zeros((folds.len(), voxels));
    let mut intercepts = Vec::with_capacity(folds.len());

    for (k, (fold, fit)) in folds.iter().zip(fits).enumerate() {
        for (j, &obs) in fold.test.iter().enumerate() {
            yfit[obs] = fit.yfit[j];
        }
        if let (Some(target), Some(found)) = (probabilities.as_mut(), fit.probabilities.as_ref()) {
            check_len("fold probability classes", target.ncols(), found.ncols())?;
            for (j, &obs) in fold.test.iter().enumerate() {
                target.row_mut(obs).assign(&found.row(j));
            }
        }
        if let (Some(target), Some(found)) =
            (decision_distances.as_mut(), fit.decision_distances.as_ref())
        {
            for (j, &obs) in fold.test.iter().enumerate() {
                target[obs] = found[j];
            }
        }
        check_len("fold weight map", voxels, fit.weights.len())?;
        weight_rows.row_mut(k).assign(&fit.weights);
        intercepts.push(fit.intercept);
        log::debug!("Fold {k}: {} held out, intercept {:.4}", fold.test.len(), fit.intercept);
    }

    Ok(CrossValidated {
        yfit,
        intercepts,
        weight_maps: matrix.derive_detached(weight_rows)?,
        probabilities,
        decision_distances,
    })
}

/// Fits the estimator built by `factory` to `matrix`'s labels.
///
/// Returns full-sample predictions, intercept and `[1, voxels]` weight map,
/// plus held-out predictions and `[folds, voxels]` weight maps when `cv` is
/// given. Classifiers additionally return probabilities and/or decision
/// distances depending on their kind. `plotter`, when given, is handed the
/// finished diagnostics last and cannot alter them.
///
/// Fails with [`Error::InvalidInput`] when the matrix has no labels, and
/// propagates any estimator or fold-validation failure.
pub fn predict<E, F>(
    matrix: &VoxelMatrix,
    factory: F,
    cv: Option<&dyn CrossValidation>,
    options: &PredictOptions,
    plotter: Option<&mut dyn PredictionPlotter>,
) -> Result<PredictionOutput>
where
    E: Estimator,
    F: Fn() -> E + Sync,
{
    if !matrix.has_labels() {
        return Err(Error::InvalidInput(
            "prediction needs labels; attach them with VoxelMatrix::with_labels".to_string(),
        ));
    }
    let n_obs = matrix.rows();
    if n_obs < 2 {
        return Err(Error::InvalidInput(format!(
            "prediction needs at least 2 observations, found {n_obs}"
        )));
    }
    let x = matrix.data();
    let y = matrix.labels();

    let mut estimator = factory();
    let name = estimator.name().to_string();
    let prediction_type = estimator.prediction_type();
    log::info!(
        "Fitting {name} ({prediction_type}) on {n_obs} observations x {} voxels",
        matrix.voxel_count()
    );

    estimator.fit(x, y)?;
    let yfit_all = estimator.predict(x)?;
    check_len("full-sample predictions", n_obs, yfit_all.len())?;
    let (probabilities_all, decision_distances_all) = class_outputs(&estimator, x)?;
    if let Some(p) = &probabilities_all {
        check_len("full-sample probabilities", n_obs, p.nrows())?;
    }
    let intercept = estimator.intercept()?;
    let weight_map = matrix.derive_row(estimator.coefficients()?.into_weight_map()?)?;

    let cross_validation = match cv {
        Some(scheme) => Some(cross_validate(
            matrix,
            &factory,
            scheme,
            options,
            probabilities_all.as_ref().map(Array2::ncols),
            decision_distances_all.is_some(),
        )?),
        None => None,
    };

    let metrics = options.compute_metrics.then(|| {
        let metrics = Metrics::compute(
            prediction_type,
            y,
            yfit_all.view(),
            cross_validation.as_ref().map(|cv| cv.yfit.view()),
        );
        metrics.log();
        metrics
    });

    let output = PredictionOutput {
        estimator: name,
        prediction_type,
        y: y.to_owned(),
        yfit_all,
        intercept,
        weight_map,
        probabilities_all,
        decision_distances_all,
        cross_validation,
        metrics,
    };

    if let Some(plotter) = plotter {
        draw(plotter, &output);
    }
    Ok(output)
}

/// Hands the held-out diagnostics to `plotter`, falling back to the
/// full-sample ones when no cross-validation ran.
fn draw(plotter: &mut dyn PredictionPlotter, output: &PredictionOutput) {
    let observed = output.y.view();
    let xval = output.cross_validation.as_ref();

    log::debug!("Drawing {}", PlotKind::WeightMap);
    plotter.weight_map(&output.weight_map);

    match output.prediction_type {
        PredictionType::Regression => {
            let predicted = xval.map_or(output.yfit_all.view(), |cv| cv.yfit.view());
            log::debug!("Drawing {}", PlotKind::Scatter);
            plotter.scatter(observed, predicted);
        }
        PredictionType::Classification => {
            let probabilities = xval
                .and_then(|cv| cv.probabilities.as_ref())
                .or(output.probabilities_all.as_ref());
            if let Some(probabilities) = probabilities {
                log::debug!("Drawing {}", PlotKind::Probabilities);
                plotter.probabilities(observed, probabilities.view());
            }
            let distances = xval
                .and_then(|cv| cv.decision_distances.as_ref())
                .or(output.decision_distances_all.as_ref());
            if let Some(distances) = distances {
                log::debug!("Drawing {}", PlotKind::DecisionDistances);
                plotter.decision_distances(observed, distances.view());
            }
        }
    }
}

/// [`predict`] with the estimator, fold scheme and options taken from `config`.
pub fn predict_with_config(
    matrix: &VoxelMatrix,
    config: &Config,
    plotter: Option<&mut dyn PredictionPlotter>,
) -> Result<PredictionOutput> {
    let algorithm = &config.prediction.algorithm;
    let scheme = CvScheme::k_fold_from_config(config);
    predict(
        matrix,
        || algorithm.build(),
        Some(&scheme),
        &PredictOptions::from(config),
        plotter,
    )
}
