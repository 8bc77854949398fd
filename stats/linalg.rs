//! Thin bridge between `ndarray` storage and `faer` decompositions.
//!
//! Design pseudo-inverses go through a thin SVD of the design itself, so the
//! rank cutoff sees the design's own condition number. Shifted Gram solves for
//! ridge-type models and principal components use the symmetric
//! eigendecomposition.

use faer::diag::DiagRef;
use faer::linalg::solvers;
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2};
use thiserror::Error;

/// Default relative cutoff below which singular values of a design, or
/// eigenvalues of a Gram matrix, count as zero.
pub const DEFAULT_RCOND: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Singular value decomposition failed: {0:?}")]
    Svd(solvers::SvdError),
    #[error("Matrix contains non-finite values")]
    NonFinite,
    #[error("Shifted system is singular (smallest pivot {0:.3e})")]
    SingularShift(f64),
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl FaerStorage<'_> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy view of an `ndarray` matrix as a `faer` matrix when the memory
/// layout allows it, otherwise an owned copy.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_row_major_slice(slice, array.nrows(), array.ncols()),
            ),
            Some(slice) if array.t().is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_column_major_slice(slice, array.nrows(), array.ncols()),
            ),
            _ => {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub trait FaerSvd {
    /// Thin SVD `A = U·diag(s)·Vᵗ` with `k = min(rows, cols)`: `U` is
    /// `[rows, k]`, `s` has length `k` in decreasing order, `V` is `[cols, k]`.
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        if self.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let faer_view = FaerArrayView::new(self);
        let svd = faer_view
            .as_ref()
            .thin_svd()
            .map_err(FaerLinalgError::Svd)?;
        let u = mat_to_array(svd.U());
        let singular = diag_to_array(svd.S());
        let v = mat_to_array(svd.V());
        Ok((u, singular, v))
    }
}

pub trait FaerEigh {
    /// Eigenvalues in ascending order with matching eigenvector columns.
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        if self.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

/// Eigenpairs of a symmetric positive semi-definite matrix, sorted by
/// decreasing eigenvalue, keeping only those above `rcond * max_eigenvalue`.
pub fn positive_eigh(
    matrix: ArrayView2<f64>,
    rcond: f64,
) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
    let (values, vectors) = matrix.eigh(Side::Lower)?;
    if values.is_empty() {
        return Ok((values, Array2::zeros((matrix.nrows(), 0))));
    }
    let max_eig = values.iter().fold(0.0_f64, |acc, &v| acc.max(v));
    let cutoff = (max_eig * rcond).max(f64::MIN_POSITIVE);

    let mut idxs: Vec<usize> = (0..values.len()).filter(|&i| values[i] > cutoff).collect();
    idxs.sort_by(|&i, &j| {
        values[j]
            .partial_cmp(&values[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let kept_values = Array1::from_iter(idxs.iter().map(|&i| values[i]));
    let kept_vectors = vectors.select(Axis(1), &idxs);
    Ok((kept_values, kept_vectors))
}

/// Moore-Penrose pseudo-inverse of a design matrix together with the
/// diagonal of `(DᵗD)⁺` restricted to its numerical range.
#[derive(Clone, Debug)]
pub struct PseudoInverse {
    /// `pinv(D)`, shape `[predictors, observations]`.
    pub pinv: Array2<f64>,
    /// `diag((DᵗD)⁺)`, one entry per predictor.
    pub gram_inverse_diag: Array1<f64>,
    /// Number of singular values kept.
    pub rank: usize,
}

/// `pinv(D) = V·diag(1/s)·Uᵗ` over the singular values above `rcond · s_max`,
/// and `diag((DᵗD)⁺)[i] = Σ_k V[i,k]² / s_k²` over the same directions.
pub fn pseudo_inverse(design: ArrayView2<f64>, rcond: f64) -> Result<PseudoInverse, FaerLinalgError> {
    let (u, singular, v) = design.thin_svd()?;
    let s_max = singular.iter().fold(0.0_f64, |acc, &s| acc.max(s));
    let cutoff = (s_max * rcond).max(f64::MIN_POSITIVE);
    let kept: Vec<usize> = (0..singular.len()).filter(|&k| singular[k] > cutoff).collect();

    let u = u.select(Axis(1), &kept);
    let v = v.select(Axis(1), &kept);
    let inverse = Array1::from_iter(kept.iter().map(|&k| 1.0 / singular[k]));

    let v_scaled = &v * &inverse.view().insert_axis(Axis(0));
    let pinv = v_scaled.dot(&u.t());
    let gram_inverse_diag = v_scaled.mapv(|x| x * x).sum_axis(Axis(1));
    Ok(PseudoInverse {
        pinv,
        gram_inverse_diag,
        rank: kept.len(),
    })
}

/// Solves `(K + shift·I) x = rhs` for a symmetric `K` through its eigendecomposition.
pub fn solve_shifted_symmetric(
    kernel: ArrayView2<f64>,
    shift: f64,
    rhs: ArrayView1<f64>,
) -> Result<Array1<f64>, FaerLinalgError> {
    let (values, vectors) = kernel.eigh(Side::Lower)?;
    let shifted = values.mapv(|v| v + shift);
    let smallest = shifted.iter().fold(f64::INFINITY, |acc, &v| acc.min(v.abs()));
    if !smallest.is_finite() || smallest <= f64::EPSILON * shifted.len().max(1) as f64 {
        return Err(FaerLinalgError::SingularShift(smallest));
    }
    let projected = vectors.t().dot(&rhs) / &shifted;
    Ok(vectors.dot(&projected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn pseudo_inverse_of_full_rank_design_is_left_inverse() {
        let design = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let result = pseudo_inverse(design.view(), DEFAULT_RCOND).unwrap();
        assert_eq!(result.rank, 2);
        let identity = result.pinv.dot(&design);
        for ((i, j), &value) in identity.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(value, expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn gram_inverse_diagonal_matches_closed_form() {
        // DᵗD = [[4, 6], [6, 14]], det = 20, inverse diag = [14/20, 4/20].
        let design = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let result = pseudo_inverse(design.view(), DEFAULT_RCOND).unwrap();
        assert_abs_diff_eq!(result.gram_inverse_diag[0], 0.7, epsilon = 1e-10);
        assert_abs_diff_eq!(result.gram_inverse_diag[1], 0.2, epsilon = 1e-10);
    }

    #[test]
    fn offset_covariate_keeps_full_rank() {
        // Columns differ in scale by 1e4; the Gram matrix is conditioned near 3e14.
        let design = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { 1.0 } else { 1e4 + i as f64 });
        let result = pseudo_inverse(design.view(), DEFAULT_RCOND).unwrap();
        assert_eq!(result.rank, 2);
        let identity = result.pinv.dot(&design);
        assert_abs_diff_eq!(identity[[0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(identity[[1, 1]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(identity[[1, 0]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn thin_svd_reconstructs_the_input() {
        let a = array![[3.0, 1.0], [1.0, 3.0], [0.0, 2.0]];
        let (u, s, v) = a.thin_svd().unwrap();
        assert_eq!(u.dim(), (3, 2));
        assert_eq!(v.dim(), (2, 2));
        assert!(s[0] >= s[1]);
        let rebuilt = (&u * &s.view().insert_axis(Axis(0))).dot(&v.t());
        for (got, want) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }
    }

    #[test]
    fn rank_deficient_design_reports_reduced_rank() {
        let design = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        let result = pseudo_inverse(design.view(), DEFAULT_RCOND).unwrap();
        assert_eq!(result.rank, 1);
    }

    #[test]
    fn shifted_solve_recovers_known_solution() {
        let kernel = array![[2.0, 1.0], [1.0, 3.0]];
        let expected = array![1.0, -1.0];
        let rhs = (&kernel + &(Array2::<f64>::eye(2) * 0.5)).dot(&expected);
        let solved = solve_shifted_symmetric(kernel.view(), 0.5, rhs.view()).unwrap();
        for (got, want) in solved.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let kernel = array![[f64::NAN, 0.0], [0.0, 1.0]];
        assert!(matches!(
            kernel.eigh(Side::Lower),
            Err(FaerLinalgError::NonFinite)
        ));
    }
}
