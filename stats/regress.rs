//! # Vectorised mass-univariate OLS
//!
//! Every voxel is regressed on the same design `D` in one pass:
//! `beta = pinv(D) · Y` is a single `[predictors, obs] × [obs, voxels]` product,
//! so the per-voxel loop never materialises.
//!
//! Standard errors use the population residual deviation (no degrees-of-freedom
//! correction), `se[k, v] = sigma[v] · sqrt(diag((DᵗD)⁻¹)[k])`, and p-values are
//! two-sided against a Student-t with `obs - predictors` degrees of freedom.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::linalg::{self, DEFAULT_RCOND};
use crate::matrix::VoxelMatrix;
use ndarray::{Array1, Array2, Axis, Zip};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Regression maps, each sharing the input's voxel layout.
#[derive(Clone, Debug)]
pub struct RegressionResult {
    /// `[predictors, voxels]`.
    pub beta: VoxelMatrix,
    /// `[predictors, voxels]`.
    pub t: VoxelMatrix,
    /// `[predictors, voxels]`.
    pub p: VoxelMatrix,
    /// `[1, voxels]`, constant `obs - predictors`.
    pub df: VoxelMatrix,
    /// `[1, voxels]`.
    pub sigma: VoxelMatrix,
    /// `[obs, voxels]`.
    pub residual: VoxelMatrix,
}

/// Regresses every voxel on `matrix.design()` with the default singular value cutoff.
pub fn regress(matrix: &VoxelMatrix) -> Result<RegressionResult> {
    regress_with_rcond(matrix, DEFAULT_RCOND)
}

/// Runs [`regress`] with the singular value cutoff configured under `[linalg]`.
pub fn regress_with_config(matrix: &VoxelMatrix, config: &Config) -> Result<RegressionResult> {
    regress_with_rcond(matrix, config.linalg.rcond)
}

pub fn regress_with_rcond(matrix: &VoxelMatrix, rcond: f64) -> Result<RegressionResult> {
    let design = matrix.design();
    if design.is_empty() {
        return Err(Error::InvalidDesign(
            "the design matrix is empty; attach one with `with_design`".to_string(),
        ));
    }
    if design.nrows() != matrix.rows() {
        return Err(Error::shape("regression design", matrix.rows(), design.nrows()));
    }

    let (n_obs, n_pred) = (design.nrows(), design.ncols());
    if n_obs <= n_pred {
        return Err(Error::InvalidDesign(format!(
            "{n_obs} observations leave no residual degrees of freedom for {n_pred} predictors"
        )));
    }

    log::info!(
        "Regressing {} voxels on {} predictors ({} observations)",
        matrix.voxel_count(),
        n_pred,
        n_obs
    );

    let x = design.values();
    let y = matrix.data();
    let pinv = linalg::pseudo_inverse(x, rcond)?;
    if pinv.rank < n_pred {
        return Err(Error::InvalidDesign(format!(
            "design columns {:?} are collinear (rank {} < {})",
            design.columns(),
            pinv.rank,
            n_pred
        )));
    }

    let beta = pinv.pinv.dot(&y);
    let residual = &y - &x.dot(&beta);
    let sigma = residual.std_axis(Axis(0), 0.0);

    let se_scale = pinv.gram_inverse_diag.mapv(f64::sqrt);
    let mut t = Array2::<f64>::zeros(beta.raw_dim());
    Zip::indexed(&mut t)
        .and(&beta)
        .for_each(|(k, v), t_kv, &b| *t_kv = b / (sigma[v] * se_scale[k]));

    let df_value = (n_obs - n_pred) as f64;
    let p = two_sided_p_values(&t, df_value)?;
    let df = Array1::from_elem(matrix.voxel_count(), df_value);

    log::debug!("Regression finished; residual df = {df_value}");

    Ok(RegressionResult {
        beta: matrix.derive_detached(beta)?,
        t: matrix.derive_detached(t)?,
        p: matrix.derive_detached(p)?,
        df: matrix.derive_row(df)?,
        sigma: matrix.derive_row(sigma)?,
        residual: matrix.derive(residual)?,
    })
}

/// `2 · (1 − CDF_t(|t|, df))` elementwise. NaN statistics stay NaN.
pub(crate) fn two_sided_p_values(t: &Array2<f64>, df: f64) -> Result<Array2<f64>> {
    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| {
        Error::InvalidInput(format!("invalid degrees of freedom {df}: {e}"))
    })?;
    Ok(t.mapv(|value| two_sided_p(&dist, value)))
}

pub(crate) fn two_sided_p(dist: &StudentsT, t: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    2.0 * (1.0 - dist.cdf(t.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Design;
    use crate::mask::{BinaryMask, MaskingAdapter};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, array};
    use std::sync::Arc;

    fn mask_with(voxels: usize) -> Arc<dyn MaskingAdapter> {
        Arc::new(BinaryMask::new(Array3::from_elem((voxels, 1, 1), true)).unwrap())
    }

    fn intercept_example() -> VoxelMatrix {
        let data = Array2::from_shape_fn((10, 3), |(i, j)| {
            ((i * 7 + j * 3) % 11) as f64 + j as f64 * 2.0
        });
        VoxelMatrix::new(data, mask_with(3))
            .unwrap()
            .with_design(Design::intercept(10))
            .unwrap()
    }

    #[test]
    fn intercept_only_design_gives_column_means() {
        let m = intercept_example();
        let out = regress(&m).unwrap();
        let means = m.data().mean_axis(Axis(0)).unwrap();
        assert_eq!(out.beta.shape(), (1, 3));
        for v in 0..3 {
            assert_abs_diff_eq!(out.beta.data()[[0, v]], means[v], epsilon = 1e-10);
        }
        assert_eq!(out.df.data().row(0).to_vec(), vec![9.0, 9.0, 9.0]);
    }

    #[test]
    fn intercept_only_t_is_mean_over_population_standard_error() {
        let m = intercept_example();
        let out = regress(&m).unwrap();
        let means = m.data().mean_axis(Axis(0)).unwrap();
        let sds = m.data().std_axis(Axis(0), 0.0);
        for v in 0..3 {
            let expected = means[v] / (sds[v] * (1.0_f64 / 10.0).sqrt());
            assert_abs_diff_eq!(out.t.data()[[0, v]], expected, epsilon = 1e-8);
            assert_abs_diff_eq!(out.sigma.data()[[0, v]], sds[v], epsilon = 1e-10);
        }
    }

    #[test]
    fn output_shapes_follow_predictors_and_observations() {
        let design = Design::new(
            vec!["intercept".into(), "x".into()],
            Array2::from_shape_fn((6, 2), |(i, j)| if j == 0 { 1.0 } else { i as f64 }),
        )
        .unwrap();
        let data = Array2::from_shape_fn((6, 4), |(i, j)| (i * i + j) as f64);
        let m = VoxelMatrix::new(data, mask_with(4))
            .unwrap()
            .with_design(design)
            .unwrap();
        let out = regress(&m).unwrap();
        assert_eq!(out.beta.shape(), (2, 4));
        assert_eq!(out.t.shape(), (2, 4));
        assert_eq!(out.p.shape(), (2, 4));
        assert_eq!(out.sigma.shape(), (1, 4));
        assert_eq!(out.df.shape(), (1, 4));
        assert_eq!(out.residual.shape(), (6, 4));
        assert_eq!(out.residual.design().ncols(), 2);
    }

    #[test]
    fn missing_design_is_rejected() {
        let m = VoxelMatrix::new(Array2::zeros((4, 2)), mask_with(2)).unwrap();
        assert!(matches!(regress(&m), Err(Error::InvalidDesign(_))));
    }

    #[test]
    fn collinear_design_is_rejected() {
        let design = Design::new(
            vec!["a".into(), "b".into()],
            array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [1.0, 2.0]],
        )
        .unwrap();
        let m = VoxelMatrix::new(Array2::ones((4, 2)), mask_with(2))
            .unwrap()
            .with_design(design)
            .unwrap();
        assert!(matches!(regress(&m), Err(Error::InvalidDesign(_))));
    }

    #[test]
    fn configured_cutoff_decides_numerical_rank() {
        // Second column is the first plus a 1e-3 wobble; the singular value
        // ratio is about 8e-5.
        let design = Design::new(
            vec!["a".into(), "b".into()],
            Array2::from_shape_fn((6, 2), |(i, j)| {
                1.0 + i as f64 + if j == 1 && i % 2 == 0 { 1e-3 } else { 0.0 }
            }),
        )
        .unwrap();
        let m = VoxelMatrix::new(Array2::from_shape_fn((6, 2), |(i, j)| (i * j) as f64), mask_with(2))
            .unwrap()
            .with_design(design)
            .unwrap();
        assert!(regress(&m).is_ok());

        let mut config = Config::default();
        config.linalg.rcond = 1e-3;
        assert!(matches!(
            regress_with_config(&m, &config),
            Err(Error::InvalidDesign(_))
        ));
    }

    #[test]
    fn two_sided_p_handles_extremes() {
        let dist = StudentsT::new(0.0, 1.0, 5.0).unwrap();
        assert_abs_diff_eq!(two_sided_p(&dist, 0.0), 1.0, epsilon = 1e-12);
        assert!(two_sided_p(&dist, f64::NAN).is_nan());
        assert_abs_diff_eq!(two_sided_p(&dist, f64::INFINITY), 0.0, epsilon = 1e-12);
    }
}
