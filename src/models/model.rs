//! Model evaluation for MC-NNM.
//!
//! The solver relies on a handful of primitive operations:
//! - fitted values `L + X̃ H Z̃' + Σ_j V_j γ_j + α 1' + 1 β'`
//! - residuals `R = Y - fitted`
//! - the Ω-weighted masked gradient `G = P_O(P_O(R) Ω)`
//! - the penalized objective and held-out MSE
//!
//! These are implemented here as small, pure functions so the solver and the
//! search code stay generic.

use nalgebra::DMatrix;

use crate::domain::{FitComponents, Lambdas, PanelData};

/// Covariates augmented with intercept columns, borrowed from a panel.
#[derive(Debug, Clone)]
pub struct Design<'a> {
    pub outcomes: &'a DMatrix<f64>,
    /// `X̃ = [X, 1]` (N×(p+1)).
    pub x_tilde: DMatrix<f64>,
    /// `Z̃ = [Z, 1]` (T×(q+1)).
    pub z_tilde: DMatrix<f64>,
    pub unit_time: &'a [DMatrix<f64>],
    pub omega: Option<&'a DMatrix<f64>>,
}

impl<'a> Design<'a> {
    pub fn new(panel: &'a PanelData) -> Self {
        Self {
            outcomes: &panel.outcomes,
            x_tilde: with_intercept(panel.unit_covariates.as_ref(), panel.n_units()),
            z_tilde: with_intercept(panel.time_covariates.as_ref(), panel.n_periods()),
            unit_time: &panel.unit_time_covariates,
            omega: panel.omega.as_ref(),
        }
    }

    pub fn n_units(&self) -> usize {
        self.outcomes.nrows()
    }

    pub fn n_periods(&self) -> usize {
        self.outcomes.ncols()
    }

    /// Shape of H: `(p + 1, q + 1)`.
    pub fn h_shape(&self) -> (usize, usize) {
        (self.x_tilde.ncols(), self.z_tilde.ncols())
    }

    pub fn zero_components(&self) -> FitComponents {
        let (hr, hc) = self.h_shape();
        FitComponents::zeros(self.n_units(), self.n_periods(), hr, hc, self.unit_time.len())
    }
}

/// `[C, 1]`, or a single column of ones without covariates.
pub(crate) fn with_intercept(covariates: Option<&DMatrix<f64>>, rows: usize) -> DMatrix<f64> {
    match covariates {
        Some(c) => {
            let k = c.ncols();
            c.clone().insert_column(k, 1.0)
        }
        None => DMatrix::from_element(rows, 1, 1.0),
    }
}

/// Usable-cell mask as 0/1 weights.
pub fn mask_weights(mask: &DMatrix<bool>) -> DMatrix<f64> {
    mask.map(|m| if m { 1.0 } else { 0.0 })
}

/// Fitted values at every cell.
pub fn fitted_values(design: &Design<'_>, comps: &FitComponents) -> DMatrix<f64> {
    let mut fitted = &comps.low_rank
        + &design.x_tilde * &comps.covariate_coefficients * design.z_tilde.transpose();
    for (v, &g) in design.unit_time.iter().zip(comps.unit_time_coefficients.iter()) {
        fitted += v * g;
    }
    for ((i, t), value) in indexed_mut(&mut fitted) {
        *value += comps.unit_effects[i] + comps.time_effects[t];
    }
    fitted
}

fn indexed_mut(m: &mut DMatrix<f64>) -> impl Iterator<Item = ((usize, usize), &mut f64)> {
    let nrows = m.nrows();
    m.iter_mut()
        .enumerate()
        .map(move |(k, v)| ((k % nrows, k / nrows), v))
}

/// `R = Y - fitted`.
pub fn residuals(design: &Design<'_>, comps: &FitComponents) -> DMatrix<f64> {
    design.outcomes - fitted_values(design, comps)
}

/// Ω-weighted masked gradient `G = P_O(P_O(R) Ω)` (or `P_O(R)` without Ω).
///
/// `G` is the negative gradient of the loss with respect to the fitted values.
pub fn masked_gradient(residual: &DMatrix<f64>, mask: &DMatrix<f64>, omega: Option<&DMatrix<f64>>) -> DMatrix<f64> {
    let project = |m: &DMatrix<f64>| m.zip_map(mask, |v, w| if w > 0.0 { v * w } else { 0.0 });
    let masked = project(residual);
    match omega {
        Some(o) => project(&(masked * o)),
        None => masked,
    }
}

/// Loss term `½ Σ_i r̃_i' Ω r̃_i`, given R and its masked gradient.
pub fn weighted_loss(residual: &DMatrix<f64>, gradient: &DMatrix<f64>) -> f64 {
    0.5 * residual.dot(gradient)
}

/// Penalized objective `loss + λ_L ‖L‖_* + λ_H ‖H‖_F²`.
pub fn penalized_objective(loss: f64, low_rank_nuclear: f64, comps: &FitComponents, lambdas: Lambdas) -> f64 {
    loss + lambdas.lambda_l * low_rank_nuclear + lambdas.lambda_h * comps.covariate_coefficients.norm_squared()
}

/// Mean squared error of fitted values over `cells`.
///
/// Returns `NaN` for an empty cell list.
pub fn mse_over_cells(design: &Design<'_>, comps: &FitComponents, cells: &[(usize, usize)]) -> f64 {
    if cells.is_empty() {
        return f64::NAN;
    }
    let fitted = fitted_values(design, comps);
    let sse: f64 = cells
        .iter()
        .map(|&(i, t)| {
            let r = design.outcomes[(i, t)] - fitted[(i, t)];
            r * r
        })
        .sum();
    sse / cells.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn panel() -> PanelData {
        let y = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        PanelData::new(y, DMatrix::from_element(2, 3, false))
            .with_unit_covariates(DMatrix::from_row_slice(2, 1, &[0.5, -0.5]))
    }

    #[test]
    fn fitted_values_sum_all_components() {
        let p = panel();
        let design = Design::new(&p);
        assert_eq!(design.h_shape(), (2, 1));

        let mut comps = design.zero_components();
        comps.low_rank[(0, 1)] = 1.0;
        comps.covariate_coefficients = DMatrix::from_row_slice(2, 1, &[2.0, 10.0]);
        comps.unit_effects = DVector::from_row_slice(&[0.1, 0.2]);
        comps.time_effects = DVector::from_row_slice(&[0.0, 0.0, 3.0]);

        let fitted = fitted_values(&design, &comps);
        // unit 0: x = 0.5 -> 2*0.5 + 10 = 11
        assert!((fitted[(0, 0)] - 11.1).abs() < 1e-12);
        assert!((fitted[(0, 1)] - 12.1).abs() < 1e-12);
        // unit 1: x = -0.5 -> -1 + 10 = 9
        assert!((fitted[(1, 2)] - 12.2).abs() < 1e-12);
    }

    #[test]
    fn unit_time_covariates_enter_linearly() {
        let v = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
        let p = panel().with_unit_time_covariates(vec![v]);
        let design = Design::new(&p);
        let mut comps = design.zero_components();
        comps.unit_time_coefficients[0] = 1.5;
        let fitted = fitted_values(&design, &comps);
        assert!((fitted[(0, 0)] - 1.5).abs() < 1e-12);
        assert!((fitted[(1, 2)] - 3.0).abs() < 1e-12);
        assert_eq!(fitted[(0, 1)], 0.0);
    }

    #[test]
    fn gradient_and_loss_respect_mask_and_omega() {
        let r = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let mask = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);

        let g = masked_gradient(&r, &mask, None);
        assert_eq!(g, DMatrix::from_row_slice(1, 2, &[1.0, 0.0]));
        assert!((weighted_loss(&r, &g) - 0.5).abs() < 1e-12);

        let omega = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let g = masked_gradient(&r, &mask, Some(&omega));
        assert_eq!(g, DMatrix::from_row_slice(1, 2, &[2.0, 0.0]));
        assert!((weighted_loss(&r, &g) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mse_reads_only_listed_cells() {
        let p = panel();
        let design = Design::new(&p);
        let comps = design.zero_components();
        assert!((mse_over_cells(&design, &comps, &[(0, 0), (1, 0)]) - 8.5).abs() < 1e-12);
        assert!(mse_over_cells(&design, &comps, &[]).is_nan());
    }

    #[test]
    fn objective_adds_penalties() {
        let p = panel();
        let design = Design::new(&p);
        let mut comps = design.zero_components();
        comps.covariate_coefficients[(0, 0)] = 2.0;
        let f = penalized_objective(1.0, 3.0, &comps, Lambdas::new(0.5, 0.25));
        assert!((f - (1.0 + 1.5 + 1.0)).abs() < 1e-12);
    }
}
