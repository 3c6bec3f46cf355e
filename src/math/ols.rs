//! Normal-equation solves for the coordinate blocks.
//!
//! Every non-low-rank block of the model enters the fitted values linearly, so
//! minimizing the masked loss over one block is a least squares problem:
//!
//! ```text
//! minimize ½ θ' A θ - b' θ + λ ‖θ‖²
//! ```
//!
//! `A` depends only on the mask, Ω and the covariates, so it is factored once per
//! solve and reused every iteration.
//!
//! Implementation choices:
//! - `A` is symmetric positive semi-definite, so we pseudo-invert it through a
//!   symmetric eigendecomposition. Directions with (near) zero curvature are
//!   left untouched, which handles unidentified effects (e.g. a period with no
//!   usable cells) without special cases.
//! - Tolerances are relative to the largest eigenvalue.

use nalgebra::DMatrix;

/// Relative eigenvalue cutoff for the pseudo-inverse.
const PINV_RTOL: f64 = 1e-10;

/// Moore–Penrose pseudo-inverse of a symmetric positive semi-definite matrix.
pub fn symmetric_pseudo_inverse(a: &DMatrix<f64>) -> DMatrix<f64> {
    let n = a.nrows();
    if n == 0 {
        return DMatrix::zeros(0, 0);
    }
    let eig = a.clone().symmetric_eigen();
    let max = eig.eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    if !(max.is_finite() && max > 0.0) {
        return DMatrix::zeros(n, n);
    }
    let cutoff = max * PINV_RTOL * n as f64;

    let mut scaled = eig.eigenvectors.clone();
    for (j, &lambda) in eig.eigenvalues.iter().enumerate() {
        let inv = if lambda > cutoff { 1.0 / lambda } else { 0.0 };
        scaled.column_mut(j).scale_mut(inv);
    }
    scaled * eig.eigenvectors.transpose()
}

/// Pseudo-inverse of `A + ridge·I`.
pub fn ridge_pseudo_inverse(a: &DMatrix<f64>, ridge: f64) -> DMatrix<f64> {
    let mut shifted = a.clone();
    for i in 0..shifted.nrows() {
        shifted[(i, i)] += ridge;
    }
    symmetric_pseudo_inverse(&shifted)
}

/// Largest eigenvalue of a symmetric matrix.
pub fn max_eigenvalue(a: &DMatrix<f64>) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.clone().symmetric_eigen().eigenvalues.max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn pseudo_inverse_matches_inverse_when_full_rank() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = symmetric_pseudo_inverse(&a);
        let eye = &a * &inv;
        assert!((eye - DMatrix::<f64>::identity(2, 2)).amax() < 1e-12);
    }

    #[test]
    fn pseudo_inverse_ignores_null_directions() {
        // Rank one: only the (1, 1) direction has curvature.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let pinv = symmetric_pseudo_inverse(&a);
        let b = DVector::from_row_slice(&[2.0, 2.0]);
        let x = &pinv * &b;
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);

        let zero = symmetric_pseudo_inverse(&DMatrix::zeros(3, 3));
        assert!(zero.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn ridge_shrinks_solution() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        let b = DVector::from_row_slice(&[2.0, 4.0]);
        let plain = symmetric_pseudo_inverse(&a) * &b;
        let ridged = ridge_pseudo_inverse(&a, 2.0) * &b;
        assert!(ridged.norm() < plain.norm());
        assert!((ridged[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn max_eigenvalue_of_identity_is_one() {
        assert!((max_eigenvalue(&DMatrix::identity(4, 4)) - 1.0).abs() < 1e-12);
        let ar = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        assert!((max_eigenvalue(&ar) - 1.5).abs() < 1e-12);
    }
}
