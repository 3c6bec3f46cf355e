//! Singular value thresholding (the proximal operator of the nuclear norm).
//!
//! For a matrix `M = U Σ V'` and threshold `τ >= 0`:
//!
//! ```text
//! SVT(M, τ) = U max(Σ - τ, 0) V'
//! ```
//!
//! Numerical notes:
//! - The SVD is computed with an iteration cap so a pathological input reports a
//!   failure instead of spinning forever.
//! - Callers get the shrunk singular values back, so `‖SVT(M, τ)‖_*` is known
//!   without a second decomposition.

use nalgebra::{DMatrix, DVector};

/// Iteration cap handed to the bidiagonal SVD.
const SVD_MAX_ITER: usize = 10_000;

/// Result of a thresholding step.
#[derive(Debug, Clone)]
pub struct Shrunk {
    pub matrix: DMatrix<f64>,
    /// Singular values after shrinkage (unsorted, non-negative).
    pub singular_values: DVector<f64>,
}

impl Shrunk {
    pub fn nuclear_norm(&self) -> f64 {
        self.singular_values.sum()
    }

    pub fn rank(&self) -> usize {
        self.singular_values.iter().filter(|&&s| s > 0.0).count()
    }
}

/// Shrink every singular value of `m` by `tau`, clamping at zero.
///
/// Returns `None` when the SVD does not converge or the input/output contains
/// non-finite values.
pub fn singular_value_threshold(m: &DMatrix<f64>, tau: f64) -> Option<Shrunk> {
    if !tau.is_finite() || tau < 0.0 || m.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut svd = m.clone().try_svd(true, true, f64::EPSILON, SVD_MAX_ITER)?;
    if tau == 0.0 {
        return Some(Shrunk {
            matrix: m.clone(),
            singular_values: svd.singular_values,
        });
    }

    svd.singular_values.apply(|s| *s = (*s - tau).max(0.0));
    let singular_values = svd.singular_values.clone();
    if singular_values.iter().all(|&s| s == 0.0) {
        return Some(Shrunk {
            matrix: DMatrix::zeros(m.nrows(), m.ncols()),
            singular_values,
        });
    }

    let matrix = svd.recompose().ok()?;
    if matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Shrunk {
        matrix,
        singular_values,
    })
}

/// Sum of singular values.
pub fn nuclear_norm(m: &DMatrix<f64>) -> f64 {
    m.singular_values().sum()
}

/// Largest singular value (operator 2-norm).
pub fn spectral_norm(m: &DMatrix<f64>) -> f64 {
    if m.is_empty() {
        return 0.0;
    }
    m.singular_values().max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            4,
            3,
            &[
                3.0, 1.0, 0.5, //
                1.0, 2.0, -1.0, //
                0.0, 1.5, 2.5, //
                -2.0, 0.5, 1.0,
            ],
        )
    }

    #[test]
    fn zero_threshold_returns_input() {
        let m = sample();
        let out = singular_value_threshold(&m, 0.0).unwrap();
        assert_eq!(out.matrix, m);
        assert!((out.nuclear_norm() - nuclear_norm(&m)).abs() < 1e-10);
    }

    #[test]
    fn threshold_above_spectral_norm_gives_zero() {
        let m = sample();
        let out = singular_value_threshold(&m, spectral_norm(&m) + 1e-9).unwrap();
        assert!(out.matrix.iter().all(|&v| v == 0.0));
        assert_eq!(out.rank(), 0);
    }

    #[test]
    fn shrinkage_reduces_rank_and_nuclear_norm() {
        let m = sample();
        let sv = m.singular_values();
        let mut sorted: Vec<f64> = sv.iter().copied().collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let tau = 0.5 * (sorted[0] + sorted[1]);

        let out = singular_value_threshold(&m, tau).unwrap();
        assert_eq!(out.rank(), 1);
        assert!(out.nuclear_norm() <= nuclear_norm(&m));
        assert!((out.nuclear_norm() - (sorted[0] - tau)).abs() < 1e-9);
        assert!((nuclear_norm(&out.matrix) - out.nuclear_norm()).abs() < 1e-8);
    }

    #[test]
    fn non_finite_input_is_reported() {
        let mut m = sample();
        m[(0, 0)] = f64::INFINITY;
        assert!(singular_value_threshold(&m, 1.0).is_none());
        assert!(singular_value_threshold(&sample(), f64::NAN).is_none());
    }

    #[test]
    fn wide_matrices_are_supported() {
        let m = sample().transpose();
        let out = singular_value_threshold(&m, 0.1).unwrap();
        assert_eq!(out.matrix.shape(), (3, 4));
    }
}
