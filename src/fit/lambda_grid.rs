//! Regularization grid generation.
//!
//! `λ_L` and `λ_H` are chosen by grid search over log-spaced candidates that run
//! from a data-derived maximum down to `max · lambda_min_ratio`.
//!
//! - `λ_L,max = σ_max(G)` at `L = 0`: above it the low-rank term is exactly zero.
//! - `λ_H,max = tr(A_H)`: heavy shrinkage of the covariate coefficients.
//!
//! Grids are returned in decreasing order, which is the order the search walks
//! them (warm starts from the sparser solution).

use crate::error::EstimationError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive, ascending).
///
/// A single step yields `[max]`.
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, EstimationError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max >= min) {
        return Err(EstimationError::config(format!(
            "Invalid lambda range: min={min}, max={max} (must be finite, >0, and max>=min)."
        )));
    }
    if steps == 0 {
        return Err(EstimationError::config("n_lambda must be >= 1."));
    }
    if steps == 1 {
        return Ok(vec![max]);
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    // Pin the endpoints against rounding in exp/ln.
    out[0] = min;
    out[steps - 1] = max;
    Ok(out)
}

/// Decreasing grid from `max` to `max · min_ratio`.
///
/// A degenerate maximum (zero, e.g. when the fixed effects already explain the
/// usable cells) collapses the grid to `[0]`.
pub fn lambda_grid(max: f64, min_ratio: f64, steps: usize) -> Result<Vec<f64>, EstimationError> {
    if !(min_ratio.is_finite() && min_ratio > 0.0 && min_ratio <= 1.0) {
        return Err(EstimationError::config(format!(
            "lambda_min_ratio must be in (0, 1], got {min_ratio}."
        )));
    }
    if steps == 0 {
        return Err(EstimationError::config("n_lambda must be >= 1."));
    }
    if !max.is_finite() {
        return Err(EstimationError::numerical(format!("Non-finite lambda maximum {max}.")));
    }
    if max <= 0.0 {
        return Ok(vec![0.0]);
    }
    let mut grid = log_space(max * min_ratio, max, steps)?;
    grid.reverse();
    Ok(grid)
}

/// `λ_L` candidates: the fixed value when supplied, else the log grid.
pub fn lambda_l_grid(fixed: Option<f64>, max: f64, min_ratio: f64, steps: usize) -> Result<Vec<f64>, EstimationError> {
    match fixed {
        Some(v) => Ok(vec![v]),
        None => lambda_grid(max, min_ratio, steps),
    }
}

/// `λ_H` candidates: the fixed value when supplied, `[0]` without covariates,
/// else the log grid.
pub fn lambda_h_grid(
    fixed: Option<f64>,
    has_covariates: bool,
    max: f64,
    min_ratio: f64,
    steps: usize,
) -> Result<Vec<f64>, EstimationError> {
    match fixed {
        Some(v) => Ok(vec![v]),
        None if !has_covariates => Ok(vec![0.0]),
        None => lambda_grid(max, min_ratio, steps),
    }
}

/// Index of the grid midpoint (used as the staged-search default and as the
/// fallback when no score is finite).
pub fn middle_index(len: usize) -> usize {
    len / 2
}
