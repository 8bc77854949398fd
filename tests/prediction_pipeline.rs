use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use voxstat::predict::{
    Algorithm, Coefficients, CvScheme, Estimator, EstimatorError, Fold, LinearRegression,
    LogisticRegression, Metrics, NoopPlotter, PredictOptions, PredictionPlotter,
    PredictionSummary, PredictionType, Ridge, RidgeClassifier, predict, predict_with_config,
};
use voxstat::{BinaryMask, Config, Error, MaskingAdapter, VoxelMatrix};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn labelled(data: Array2<f64>, labels: Array1<f64>) -> VoxelMatrix {
    let mask: Arc<dyn MaskingAdapter> =
        Arc::new(BinaryMask::new(Array3::from_elem((2, 2, data.ncols() / 4), true)).unwrap());
    VoxelMatrix::new(data, mask)
        .unwrap()
        .with_labels(labels)
        .unwrap()
}

/// 24 observations over 8 voxels; labels depend on the first two voxels.
fn regression_problem(seed: u64) -> VoxelMatrix {
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array2::from_shape_fn((24, 8), |_| noise.sample(&mut rng));
    let labels = data.map_axis(Axis(1), |row| 2.0 * row[0] - row[1] + 0.05 * noise.sample(&mut rng));
    labelled(data, labels)
}

/// Predicts the training mean and counts how often it is fitted.
struct MeanEstimator {
    fits: Arc<AtomicUsize>,
    mean: Option<f64>,
    voxels: usize,
}

impl Estimator for MeanEstimator {
    fn name(&self) -> &str {
        "mean"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Regression
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        self.voxels = x.ncols();
        self.mean = y.mean();
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        let mean = self.mean.ok_or_else(|| EstimatorError::NotFitted("mean".into()))?;
        Ok(Array1::from_elem(x.nrows(), mean))
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        self.mean.ok_or_else(|| EstimatorError::NotFitted("mean".into()))
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        Ok(Coefficients::Voxel(Array1::zeros(self.voxels)))
    }
}

/// Ridge classifier that also reports probabilities as a logistic squash of
/// its margin.
struct SquashedMargin {
    inner: RidgeClassifier,
}

impl Estimator for SquashedMargin {
    fn name(&self) -> &str {
        "squashed_margin"
    }

    fn prediction_type(&self) -> PredictionType {
        PredictionType::Classification
    }

    fn uses_decision_boundary(&self) -> bool {
        true
    }

    fn probability_enabled(&self) -> bool {
        true
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), EstimatorError> {
        self.inner.fit(x, y)
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        self.inner.predict(x)
    }

    fn intercept(&self) -> Result<f64, EstimatorError> {
        self.inner.intercept()
    }

    fn coefficients(&self) -> Result<Coefficients, EstimatorError> {
        self.inner.coefficients()
    }

    fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimatorError> {
        self.inner.decision_function(x)
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, EstimatorError> {
        let positive = self.inner.decision_function(x)?.mapv(|d| 1.0 / (1.0 + (-d).exp()));
        Ok(Array2::from_shape_fn((positive.len(), 2), |(i, class)| {
            if class == 1 {
                positive[i]
            } else {
                1.0 - positive[i]
            }
        }))
    }
}

/// 20 observations over 4 voxels; only the first voxel carries the class.
fn classification_problem(seed: u64) -> VoxelMatrix {
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let labels = Array1::from_shape_fn(20, |i| (i % 2) as f64);
    let data = Array2::from_shape_fn((20, 4), |(i, v)| {
        let signal = if v == 0 { 2.0 * labels[i] - 1.0 } else { 0.0 };
        1.5 * signal + 0.5 * noise.sample(&mut rng)
    });
    labelled(data, labels)
}

#[test]
fn each_fold_sees_only_its_training_rows() {
    init_logging();
    let m = regression_problem(1);
    let fits = Arc::new(AtomicUsize::new(0));
    let folds = vec![
        Fold {
            train: (8..24).collect(),
            test: (0..8).collect(),
        },
        Fold {
            train: (0..8).chain(16..24).collect(),
            test: (8..16).collect(),
        },
        Fold {
            train: (0..16).collect(),
            test: (16..24).collect(),
        },
    ];

    let out = predict(
        &m,
        || MeanEstimator {
            fits: Arc::clone(&fits),
            mean: None,
            voxels: 0,
        },
        Some(&folds),
        &PredictOptions::default(),
        None,
    )
    .unwrap();

    assert_eq!(fits.load(Ordering::SeqCst), 1 + folds.len());
    let xval = out.cross_validation.unwrap();
    let labels = m.labels();
    for (k, fold) in folds.iter().enumerate() {
        let train_mean = labels.select(Axis(0), &fold.train).mean().unwrap();
        assert_abs_diff_eq!(xval.intercepts[k], train_mean, epsilon = 1e-12);
        for &obs in &fold.test {
            assert_abs_diff_eq!(xval.yfit[obs], train_mean, epsilon = 1e-12);
        }
    }
}

#[test]
fn perturbing_held_out_rows_does_not_move_that_fold() {
    init_logging();
    let m = regression_problem(2);
    let folds = vec![
        Fold {
            train: (12..24).collect(),
            test: (0..12).collect(),
        },
        Fold {
            train: (0..12).collect(),
            test: (12..24).collect(),
        },
    ];
    let options = PredictOptions {
        parallel_folds: true,
        compute_metrics: false,
    };
    let baseline = predict(&m, || Ridge::new(1.0), Some(&folds), &options, None)
        .unwrap()
        .cross_validation
        .unwrap();

    let mut perturbed_data = m.data().to_owned();
    perturbed_data
        .slice_mut(s![0..12, ..])
        .mapv_inplace(|v| v * 10.0 + 3.0);
    let perturbed = m.derive(perturbed_data).unwrap();
    assert_eq!(perturbed.labels(), m.labels());
    let moved = predict(&perturbed, || Ridge::new(1.0), Some(&folds), &options, None)
        .unwrap()
        .cross_validation
        .unwrap();

    let (kept, after) = (baseline.weight_maps.data(), moved.weight_maps.data());
    for (a, b) in kept.row(0).iter().zip(after.row(0).iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
    }
    assert_abs_diff_eq!(baseline.intercepts[0], moved.intercepts[0], epsilon = 1e-10);
    assert_ne!(
        baseline.weight_maps.data().row(1),
        moved.weight_maps.data().row(1)
    );
}

#[test]
fn cross_validated_linear_fit_generalises() {
    init_logging();
    let m = regression_problem(3);
    let scheme = CvScheme::KFold {
        n_folds: 4,
        seed: Some(5),
    };
    let out = predict(
        &m,
        LinearRegression::new,
        Some(&scheme),
        &PredictOptions::default(),
        None,
    )
    .unwrap();

    let xval = out.cross_validation.as_ref().unwrap();
    assert_eq!(xval.n_folds(), 4);
    assert_eq!(xval.weight_maps.shape(), (4, 8));
    assert!(xval.yfit.iter().all(|v| v.is_finite()));
    let Some(Metrics::Regression { r_xval, .. }) = &out.metrics else {
        panic!("expected regression metrics");
    };
    assert!(r_xval.unwrap() > 0.9);

    let summary = out.summary();
    let json = serde_json::to_string(&summary).unwrap();
    let parsed: PredictionSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, summary);
    assert!(json.contains("\"prediction_type\":\"regression\""));
    assert_eq!(parsed.n_voxels, 8);
    assert_eq!(parsed.n_observations, 24);
}

#[test]
fn group_folds_hold_out_whole_subjects() {
    init_logging();
    let m = regression_problem(4);
    let groups: Vec<u64> = (0..24).map(|i| i / 4).collect();
    let scheme = CvScheme::LeaveOneGroupOut { groups };
    let out = predict(
        &m,
        || Ridge::new(0.1),
        Some(&scheme),
        &PredictOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(out.summary().n_folds, Some(6));
}

#[test]
fn logistic_classification_reports_held_out_probabilities() {
    init_logging();
    let m = classification_problem(11);
    let scheme = CvScheme::KFold {
        n_folds: 5,
        seed: None,
    };

    let out = predict(
        &m,
        || LogisticRegression::new(1.0),
        Some(&scheme),
        &PredictOptions::default(),
        None,
    )
    .unwrap();
    assert_eq!(out.prediction_type, PredictionType::Classification);
    let xval = out.cross_validation.unwrap();
    let probabilities = xval.probabilities.unwrap();
    assert_eq!(probabilities.dim(), (20, 2));
    for row in probabilities.rows() {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
    }
    let Some(Metrics::Classification { accuracy_xval, .. }) = out.metrics else {
        panic!("expected classification metrics");
    };
    assert!(accuracy_xval.unwrap() >= 0.8);
}

#[test]
fn margin_classifier_with_probabilities_reports_both_outputs() {
    init_logging();
    let m = classification_problem(12);
    let scheme = CvScheme::KFold {
        n_folds: 4,
        seed: Some(3),
    };
    let plotter: &mut dyn PredictionPlotter = &mut NoopPlotter;

    let out = predict(
        &m,
        || SquashedMargin {
            inner: RidgeClassifier::new(1.0),
        },
        Some(&scheme),
        &PredictOptions::default(),
        Some(plotter),
    )
    .unwrap();

    let probabilities = out.probabilities_all.as_ref().unwrap();
    let distances = out.decision_distances_all.as_ref().unwrap();
    assert_eq!(probabilities.dim(), (20, 2));
    assert_eq!(distances.len(), 20);
    assert!(probabilities.iter().all(|p| p.is_finite()));
    assert!(distances.iter().all(|d| d.is_finite()));

    let xval = out.cross_validation.as_ref().unwrap();
    let held_out_probabilities = xval.probabilities.as_ref().unwrap();
    let held_out_distances = xval.decision_distances.as_ref().unwrap();
    assert_eq!(held_out_probabilities.dim(), (20, 2));
    assert_eq!(held_out_distances.len(), 20);
    assert!(held_out_probabilities.iter().all(|p| p.is_finite()));
    assert!(held_out_distances.iter().all(|d| d.is_finite()));
    for (row, &distance) in held_out_probabilities.rows().into_iter().zip(held_out_distances) {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(row[1] > 0.5, distance > 0.0);
    }
    let Some(Metrics::Classification { accuracy_xval, .. }) = out.metrics else {
        panic!("expected classification metrics");
    };
    assert!(accuracy_xval.unwrap() >= 0.8);
}

#[test]
fn estimator_failures_surface_as_errors() {
    let m = labelled(
        Array2::from_shape_fn((6, 4), |(i, v)| (i + v) as f64),
        Array1::from_vec(vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]),
    );
    let result = predict(
        &m,
        || LogisticRegression::new(1.0),
        None,
        &PredictOptions::default(),
        None,
    );
    assert!(matches!(
        result,
        Err(Error::Estimator(EstimatorError::InvalidLabels(_)))
    ));
}

#[test]
fn configuration_selects_the_estimator() {
    init_logging();
    let m = regression_problem(6);
    let config = Config::from_toml_str(
        r#"
        [prediction]
        parallel_folds = false
        algorithm = { name = "principal_component_regression", n_components = 4 }

        [cross_validation]
        n_folds = 3
        seed = 17
        "#,
    )
    .unwrap();
    assert_eq!(
        config.prediction.algorithm,
        Algorithm::PrincipalComponentRegression { n_components: 4 }
    );
    let out = predict_with_config(&m, &config, None).unwrap();
    assert_eq!(out.estimator, "principal_component_regression");
    assert_eq!(out.weight_map.shape(), (1, 8));
    assert_eq!(out.cross_validation.unwrap().weight_maps.shape(), (3, 8));
}
