//! Built-in estimators.
//!
//! All models are linear in voxel space, so each one reports a weight map the
//! engine can stack across folds. Fits that would need a `voxels × voxels`
//! system switch to the `observations × observations` kernel form when there
//! are more voxels than observations.

use super::estimator::{Coefficients, Estimator, EstimatorError, PredictionType};
use crate::linalg::{DEFAULT_RCOND, FaerLinalgError, positive_eigh, solve_shifted_symmetric};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

const PROB_EPS: f64 = 1e-10;
const MIN_IRLS_WEIGHT: f64 = 1e-10;
const DEFAULT_MAX_ITERATIONS: usize = 100;
const DEFAULT_TOLERANCE: f64 = 1e-8;

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

/// Estimator selection by name, as used in the `[prediction]` config table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Algorithm {
    LinearRegression,
    Ridge { alpha: f64 },
    PrincipalComponentRegression { n_components: usize },
    RidgeClassifier { alpha: f64 },
    LogisticRegression {
        alpha: f64,
        /// IRLS iteration cap.
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
        /// Relative change in penalised deviance that counts as converged.
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::Ridge { alpha: 1.0 }
    }
}

impl Algorithm {
    /// A fresh, unfitted estimator.
    pub fn build(&self) -> Box<dyn Estimator> {
        match *self {
            Self::LinearRegression => Box::new(LinearRegression::new()),
            Self::Ridge { alpha } => Box::new(Ridge::new(alpha)),
            Self::PrincipalComponentRegression { n_components } => {
                Box::new(PrincipalComponentRegression::new(n_components))
            }
            Self::RidgeClassifier { alpha } => Box::new(RidgeClassifier::new(alpha)),
            Self::LogisticRegression {
                alpha,
                max_iterations,
                tolerance,
            } => Box::new(
                LogisticRegression::new(alpha)
                    .with_max_iterations(max_iterations)
                    .with_tolerance(tolerance),
            ),
        }
    }
}

#[derive(Clone, Debug)]
struct LinearFit {
    weights: Array1<f64>,
    intercept: f64,
}

impl LinearFit {
    fn decision(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        if x.ncols() != self.weights.len() {
            return Err(EstimatorError::DimensionMismatch {
                expected: self.weights.len(),
                found: x.ncols(),
            });
        }
        Ok(x.dot(&self.weights) + self.intercept)
    }
}

fn fitted<'a, T>(fit: &'a Option<T>, name: &str) -> Result<&'a T, EstimatorError> {
    fit.as_ref()
        .ok_or_else(|| EstimatorError::NotFitted(name.to_string()))
}

fn check_training(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
    if x.nrows() != y.len() {
        return Err(EstimatorError::DimensionMismatch {
            expected: x.nrows(),
            found: y.len(),
        });
    }
    if x.nrows() < 2 {
        return Err(EstimatorError::InvalidLabels(format!(
            "at least two training observations are needed, found {}",
            x.nrows()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorError::InvalidLabels(
            "training targets contain non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn check_alpha(alpha: f64) -> Result<(), EstimatorError> {
    if alpha.is_finite() && alpha > 0.0 {
        Ok(())
    } else {
        Err(EstimatorError::InvalidParameter(format!(
            "alpha must be positive and finite, found {alpha}"
        )))
    }
}

/// Column means and the column-centred copy of `x`.
fn center(x: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let centered = &x - &mean;
    (mean, centered)
}

/// Minimum-norm least-squares weights for centred data.
fn min_norm_weights(
    xc: &Array2<f64>,
    yc: &Array1<f64>,
    rcond: f64,
) -> Result<Array1<f64>, FaerLinalgError> {
    if xc.nrows() <= xc.ncols() {
        let kernel = xc.dot(&xc.t());
        let (values, vectors) = positive_eigh(kernel.view(), rcond)?;
        let dual = vectors.dot(&(vectors.t().dot(yc) / &values));
        Ok(xc.t().dot(&dual))
    } else {
        let gram = xc.t().dot(xc);
        let (values, vectors) = positive_eigh(gram.view(), rcond)?;
        let projected = vectors.t().dot(&xc.t().dot(yc)) / &values;
        Ok(vectors.dot(&projected))
    }
}

/// Minimiser of `‖yc − xc·w‖² + alpha‖w‖²`.
fn ridge_weights(
    xc: &Array2<f64>,
    yc: &Array1<f64>,
    alpha: f64,
) -> Result<Array1<f64>, FaerLinalgError> {
    if xc.nrows() <= xc.ncols() {
        let kernel = xc.dot(&xc.t());
        let dual = solve_shifted_symmetric(kernel.view(), alpha, yc.view())?;
        Ok(xc.t().dot(&dual))
    } else {
        let gram = xc.t().dot(xc);
        let rhs = xc.t().dot(yc);
        solve_shifted_symmetric(gram.view(), alpha, rhs.view())
    }
}

/// Sorted pair of class labels, or an error unless `y` holds exactly two.
fn binary_classes(y: ArrayView1<f64>) -> Result<[f64; 2], EstimatorError> {
    let classes: Vec<f64> = y
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .dedup()
        .collect();
    match classes.as_slice() {
        &[negative, positive] => Ok([negative, positive]),
        other => Err(EstimatorError::InvalidLabels(format!(
            "binary classification needs exactly two classes, found {}",
            other.len()
        ))),
    }
}

/// Ordinary least squares; the minimum-norm solution when voxels outnumber observations.
#[derive(Clone, Debug, Default)]
pub struct LinearRegression {
    fit: Option<LinearFit>,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for LinearRegression {
    fn name(&self) -> &str {
        "linear_regression"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Regression
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        let (x_mean, xc) = center(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let yc = &y - y_mean;
        let weights = min_norm_weights(&xc, &yc, DEFAULT_RCOND)?;
        let intercept = y_mean - x_mean.dot(&weights);
        self.fit = Some(LinearFit { weights, intercept });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        fitted(&self.fit, self.name())?.decision(x)
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        Ok(fitted(&self.fit, self.name())?.intercept)
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        Ok(Coefficients::Voxel(
            fitted(&self.fit, self.name())?.weights.clone(),
        ))
    }
}

/// L2-penalised least squares with an unpenalised intercept.
#[derive(Clone, Debug)]
pub struct Ridge {
    alpha: f64,
    fit: Option<LinearFit>,
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, fit: None }
    }
}

impl Estimator for Ridge {
    fn name(&self) -> &str {
        "ridge"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Regression
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        check_alpha(self.alpha)?;
        check_training(x, y)?;
        let (x_mean, xc) = center(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let yc = &y - y_mean;
        let weights = ridge_weights(&xc, &yc, self.alpha)?;
        let intercept = y_mean - x_mean.dot(&weights);
        self.fit = Some(LinearFit { weights, intercept });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        fitted(&self.fit, self.name())?.decision(x)
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        Ok(fitted(&self.fit, self.name())?.intercept)
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        Ok(Coefficients::Voxel(
            fitted(&self.fit, self.name())?.weights.clone(),
        ))
    }
}

#[derive(Clone, Debug)]
struct PcrFit {
    loadings: Array2<f64>,
    coef: Array1<f64>,
    linear: LinearFit,
}

/// Least squares on the leading principal components of the training data.
///
/// Reports [`Coefficients::Latent`]: component loadings plus one coefficient
/// per component. The voxel-space weights used for prediction are
/// `loadingsᵀ · coef`.
#[derive(Clone, Debug)]
pub struct PrincipalComponentRegression {
    n_components: usize,
    fit: Option<PcrFit>,
}

impl PrincipalComponentRegression {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            fit: None,
        }
    }
}

impl Estimator for PrincipalComponentRegression {
    fn name(&self) -> &str {
        "principal_component_regression"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Regression
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        if self.n_components == 0 {
            return Err(EstimatorError::InvalidParameter(
                "n_components must be at least 1".to_string(),
            ));
        }
        check_training(x, y)?;
        let (x_mean, xc) = center(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let yc = &y - y_mean;

        // Components from the observation-space kernel: xc = U·sqrt(λ)·Vᵀ.
        let kernel = xc.dot(&xc.t());
        let (values, vectors) = positive_eigh(kernel.view(), DEFAULT_RCOND)?;
        let k = self.n_components.min(values.len());
        if k == 0 {
            return Err(EstimatorError::InvalidParameter(
                "training data has no variance to decompose".to_string(),
            ));
        }
        if k < self.n_components {
            log::debug!(
                "Requested {} components but the training data only supports {k}",
                self.n_components
            );
        }
        let u = vectors.slice(s![.., ..k]);
        let singular = values.slice(s![..k]).mapv(f64::sqrt);

        let components = xc.t().dot(&u) / &singular;
        let coef = u.t().dot(&yc) / &singular;
        let weights = components.dot(&coef);
        let intercept = y_mean - x_mean.dot(&weights);

        self.fit = Some(PcrFit {
            loadings: components.t().to_owned(),
            coef,
            linear: LinearFit { weights, intercept },
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        fitted(&self.fit, self.name())?.linear.decision(x)
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        Ok(fitted(&self.fit, self.name())?.linear.intercept)
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        let fit = fitted(&self.fit, self.name())?;
        Ok(Coefficients::Latent {
            loadings: fit.loadings.clone(),
            coef: fit.coef.clone(),
        })
    }
}

/// Binary classifier fitting ridge regression to ±1 targets.
///
/// Margin-based: predictions threshold the decision function at zero.
#[derive(Clone, Debug)]
pub struct RidgeClassifier {
    alpha: f64,
    fit: Option<(LinearFit, [f64; 2])>,
}

impl RidgeClassifier {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, fit: None }
    }
}

impl Estimator for RidgeClassifier {
    fn name(&self) -> &str {
        "ridge_classifier"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Classification
    }

    fn uses_decision_boundary(&self) -> bool {
        true
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        check_alpha(self.alpha)?;
        check_training(x, y)?;
        let classes = binary_classes(y)?;
        let targets = y.mapv(|v| if v == classes[1] { 1.0 } else { -1.0 });
        let (x_mean, xc) = center(x);
        let t_mean = targets.mean().unwrap_or(0.0);
        let tc = &targets - t_mean;
        let weights = ridge_weights(&xc, &tc, self.alpha)?;
        let intercept = t_mean - x_mean.dot(&weights);
        self.fit = Some((LinearFit { weights, intercept }, classes));
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        let (linear, classes) = fitted(&self.fit, self.name())?;
        Ok(linear
            .decision(x)?
            .mapv(|d| if d > 0.0 { classes[1] } else { classes[0] }))
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        Ok(fitted(&self.fit, self.name())?.0.intercept)
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        Ok(Coefficients::Voxel(
            fitted(&self.fit, self.name())?.0.weights.clone(),
        ))
    }

    fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        fitted(&self.fit, self.name())?.0.decision(x)
    }
}

/// L2-penalised binary logistic regression fitted by iteratively reweighted
/// least squares.
///
/// Each iteration solves a weighted ridge problem on the working response
/// `z = η + (t − μ)/w` with `w = μ(1 − μ)`, in kernel form when voxels
/// outnumber observations.
#[derive(Clone, Debug)]
pub struct LogisticRegression {
    alpha: f64,
    max_iterations: usize,
    tolerance: f64,
    fit: Option<(LinearFit, [f64; 2])>,
}

impl LogisticRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            fit: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn positive_probability(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        Ok(fitted(&self.fit, self.name())?.0.decision(x)?.mapv(sigmoid))
    }
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// `-2·loglik + alpha‖w‖²`.
fn penalized_deviance(targets: &Array1<f64>, mu: &Array1<f64>, weights: &Array1<f64>, alpha: f64) -> f64 {
    let deviance: f64 = targets
        .iter()
        .zip(mu.iter())
        .map(|(&t, &m)| -2.0 * (t * m.ln() + (1.0 - t) * (1.0 - m).ln()))
        .sum();
    deviance + alpha * weights.dot(weights)
}

impl Estimator for LogisticRegression {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Classification
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        check_alpha(self.alpha)?;
        check_training(x, y)?;
        if self.max_iterations == 0 || !(self.tolerance > 0.0) {
            return Err(EstimatorError::InvalidParameter(format!(
                "max_iterations must be positive and tolerance > 0, found {} and {}",
                self.max_iterations, self.tolerance
            )));
        }
        let classes = binary_classes(y)?;
        let targets = y.mapv(|v| if v == classes[1] { 1.0 } else { 0.0 });

        let mut eta = Array1::<f64>::zeros(x.nrows());
        let mut previous = f64::INFINITY;
        let mut last_change = f64::INFINITY;

        for iteration in 1..=self.max_iterations {
            let mu = eta.mapv(|e| sigmoid(e).clamp(PROB_EPS, 1.0 - PROB_EPS));
            let w = mu.mapv(|m| (m * (1.0 - m)).max(MIN_IRLS_WEIGHT));
            let z = &eta + &((&targets - &mu) / &w);

            let w_sum = w.sum();
            let x_bar = x.t().dot(&w) / w_sum;
            let z_bar = w.dot(&z) / w_sum;
            let sqrt_w = w.mapv(f64::sqrt);
            let xs = (&x - &x_bar) * &sqrt_w.view().insert_axis(Axis(1));
            let zs = (&z - z_bar) * &sqrt_w;

            let weights = ridge_weights(&xs, &zs, self.alpha)?;
            let intercept = z_bar - x_bar.dot(&weights);
            eta = x.dot(&weights) + intercept;

            let mu = eta.mapv(|e| sigmoid(e).clamp(PROB_EPS, 1.0 - PROB_EPS));
            let current = penalized_deviance(&targets, &mu, &weights, self.alpha);
            if !current.is_finite() {
                return Err(FaerLinalgError::NonFinite.into());
            }
            last_change = (current - previous).abs();
            log::debug!("IRLS iteration {iteration}: penalized deviance {current:.6}");

            if last_change < self.tolerance * (current.abs() + 0.1) {
                self.fit = Some((LinearFit { weights, intercept }, classes));
                return Ok(());
            }
            previous = current;
        }

        Err(EstimatorError::DidNotConverge {
            iterations: self.max_iterations,
            last_change,
        })
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        let classes = fitted(&self.fit, self.name())?.1;
        Ok(self
            .positive_probability(x)?
            .mapv(|p| if p >= 0.5 { classes[1] } else { classes[0] }))
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        Ok(fitted(&self.fit, self.name())?.0.intercept)
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        Ok(Coefficients::Voxel(
            fitted(&self.fit, self.name())?.0.weights.clone(),
        ))
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, EstimatorError> {
        let positive = self.positive_probability(x)?;
        Ok(Array2::from_shape_fn((positive.len(), 2), |(i, class)| {
            if class == 1 {
                positive[i]
            } else {
                1.0 - positive[i]
            }
        }))
    }
}
