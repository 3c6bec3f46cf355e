//! Block coordinate descent for a single `(λ_L, λ_H)` pair.
//!
//! Given:
//! - a design (outcomes, augmented covariates, optional Ω)
//! - a mask of usable cells
//! - regularization weights `λ_L`, `λ_H`
//!
//! we minimize
//!
//! ```text
//! F = ½ Σ_i r̃_i' Ω r̃_i + λ_L ‖L‖_* + λ_H ‖H‖_F²
//! ```
//!
//! by alternating:
//! - a proximal gradient step on `L` (singular value thresholding with step `η = 1/λ_max(Ω)`)
//! - exact minimization over α, β, H and γ in turn
//!
//! The block normal matrices depend only on the mask, Ω and the covariates, so they
//! are factored once in [`Solver::new`] and reused for every `λ_L` solved with the
//! same solver (the search walks a `λ_L` path with warm starts).

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use crate::domain::{
    EstimatorConfig, FitComponents, InitStrategy, Lambdas, NumericalWarning, SolverReport, Termination,
};
use crate::math::{max_eigenvalue, nuclear_norm, ridge_pseudo_inverse, singular_value_threshold, spectral_norm, symmetric_pseudo_inverse};
use crate::models::{mask_weights, masked_gradient, penalized_objective, residuals, weighted_loss, Design};

/// Largest H (in coefficients) that is solved in closed form.
pub const H_CLOSED_FORM_MAX: usize = 256;

/// Sweep cap for fitting the covariate/fixed-effect blocks with `L = 0`.
const REGRESSION_SWEEPS: usize = 200;

/// Curvature below which a unit effect is treated as unidentified.
const CURVATURE_EPS: f64 = 1e-12;

/// Iteration budget and block toggles for one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub use_unit_fe: bool,
    pub use_time_fe: bool,
    pub max_iter: usize,
    pub tol: f64,
    pub init: InitStrategy,
}

impl SolverOptions {
    /// Budget for the final fit on all usable cells.
    pub fn final_fit(config: &EstimatorConfig) -> Self {
        Self {
            use_unit_fe: config.use_unit_fe,
            use_time_fe: config.use_time_fe,
            max_iter: config.max_iter,
            tol: config.tol,
            init: config.init,
        }
    }

    /// Budget for fits scored during the hyperparameter search.
    pub fn validation(config: &EstimatorConfig) -> Self {
        Self {
            max_iter: config.validation_max_iter,
            tol: config.validation_tol,
            ..Self::final_fit(config)
        }
    }
}

/// Output of [`Solver::solve`].
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub components: FitComponents,
    pub report: SolverReport,
    pub warnings: Vec<NumericalWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolverState {
    Initializing,
    Iterating,
    Converged,
    MaxIterReached,
}

#[derive(Debug, Clone)]
enum CovariateUpdate {
    /// `(A_H + 2λ_H I)⁺`.
    Exact(DMatrix<f64>),
    /// One gradient step of size `1 / (tr(A_H) + 2λ_H)`.
    Gradient { step: f64 },
}

/// Precomputed block systems for one mask and one `λ_H`.
#[derive(Debug, Clone)]
pub struct Solver<'a> {
    design: &'a Design<'a>,
    mask: DMatrix<f64>,
    lambda_h: f64,
    opts: SolverOptions,
    /// Proximal step `η`.
    step: f64,
    /// `a_i = 1' D_i Ω D_i 1`.
    unit_curvature: DVector<f64>,
    /// `(Ω ∘ M'M)⁺`.
    time_inverse: DMatrix<f64>,
    /// `A_H = Σ_i kron(x̃_i x̃_i', Z̃' D_i Ω D_i Z̃)` over `vec(H)` (column-major).
    covariate_normal: DMatrix<f64>,
    covariate_update: CovariateUpdate,
    unit_time_inverse: DMatrix<f64>,
}

impl<'a> Solver<'a> {
    pub fn new(design: &'a Design<'a>, mask: &DMatrix<bool>, lambda_h: f64, opts: SolverOptions) -> Self {
        let weights = mask_weights(mask);
        let omega = design.omega;

        let step = match omega {
            Some(o) => {
                let top = max_eigenvalue(o);
                if top > 0.0 { 1.0 / top } else { 1.0 }
            }
            None => 1.0,
        };

        // P_O(P_O(M) Ω) row sums give 1' D_i Ω D_i 1.
        let unit_curvature = if opts.use_unit_fe {
            masked_gradient(&weights, &weights, omega).column_sum()
        } else {
            DVector::zeros(0)
        };

        let time_inverse = if opts.use_time_fe {
            let overlap = weights.transpose() * &weights;
            let normal = match omega {
                Some(o) => overlap.component_mul(o),
                None => DMatrix::from_diagonal(&overlap.diagonal()),
            };
            symmetric_pseudo_inverse(&normal)
        } else {
            DMatrix::zeros(0, 0)
        };

        let covariate_normal = covariate_normal_matrix(design, &weights);
        let ridge = 2.0 * lambda_h;
        let covariate_update = if covariate_normal.nrows() <= H_CLOSED_FORM_MAX {
            CovariateUpdate::Exact(ridge_pseudo_inverse(&covariate_normal, ridge))
        } else {
            let denom = covariate_normal.trace() + ridge;
            CovariateUpdate::Gradient {
                step: if denom > 0.0 { 1.0 / denom } else { 0.0 },
            }
        };

        let unit_time_inverse = if design.unit_time.is_empty() {
            DMatrix::zeros(0, 0)
        } else {
            let weighted: Vec<DMatrix<f64>> = design
                .unit_time
                .iter()
                .map(|v| masked_gradient(v, &weights, omega))
                .collect();
            let r = design.unit_time.len();
            let normal = DMatrix::from_fn(r, r, |j, k| weighted[j].dot(&design.unit_time[k]));
            symmetric_pseudo_inverse(&normal)
        };

        Self {
            design,
            mask: weights,
            lambda_h,
            opts,
            step,
            unit_curvature,
            time_inverse,
            covariate_normal,
            covariate_update,
            unit_time_inverse,
        }
    }

    /// `tr(A_H)`: the curvature scale of the covariate block.
    pub fn covariate_curvature(&self) -> f64 {
        self.covariate_normal.trace()
    }

    /// Smallest `λ_L` for which `L = 0` is optimal: `σ_max(G)` after fitting the
    /// covariate and fixed-effect blocks with `L = 0`.
    pub fn lambda_l_max(&self) -> f64 {
        let mut comps = self.design.zero_components();
        self.sweep_blocks(&mut comps);
        spectral_norm(&self.gradient(&comps))
    }

    /// Run block coordinate descent at `λ_L`, optionally from a warm start.
    pub fn solve(&self, lambda_l: f64, warm_start: Option<&FitComponents>) -> SolverOutcome {
        let lambdas = Lambdas::new(lambda_l, self.lambda_h);
        let mut comps = self.design.zero_components();
        let mut low_rank_nuclear = 0.0;
        let mut objective = f64::INFINITY;
        let mut relative_change = f64::INFINITY;
        let mut iterations = 0;
        let mut warnings = Vec::new();

        let mut state = SolverState::Initializing;
        loop {
            state = match state {
                SolverState::Initializing => {
                    match warm_start {
                        Some(warm) => {
                            comps = warm.clone();
                            low_rank_nuclear = nuclear_norm(&comps.low_rank);
                        }
                        None if self.opts.init == InitStrategy::Regression => {
                            self.sweep_blocks(&mut comps);
                        }
                        None => {}
                    }
                    objective = self.objective(&comps, low_rank_nuclear, lambdas);
                    SolverState::Iterating
                }
                SolverState::Iterating => {
                    iterations += 1;
                    if !self.update_low_rank(&mut comps, &mut low_rank_nuclear, lambda_l)
                        && !warnings.iter().any(|w| matches!(w, NumericalWarning::SvdFailure { .. }))
                    {
                        warnings.push(NumericalWarning::SvdFailure { iteration: iterations });
                    }
                    self.update_blocks(&mut comps);

                    let next = self.objective(&comps, low_rank_nuclear, lambdas);
                    relative_change = (objective - next).abs() / objective.abs().max(1e-12);
                    objective = next;
                    trace!("iter {iterations}: objective={objective:.6e} rel_change={relative_change:.3e}");

                    if relative_change < self.opts.tol {
                        SolverState::Converged
                    } else if iterations >= self.opts.max_iter || !objective.is_finite() {
                        SolverState::MaxIterReached
                    } else {
                        SolverState::Iterating
                    }
                }
                SolverState::Converged | SolverState::MaxIterReached => break,
            };
        }

        let termination = if state == SolverState::Converged {
            Termination::Converged
        } else {
            Termination::MaxIterReached
        };
        debug!(
            "solve lambda_L={:.4e} lambda_H={:.4e}: {:?} after {} iterations (objective {:.6e})",
            lambda_l, self.lambda_h, termination, iterations, objective
        );

        SolverOutcome {
            components: comps,
            report: SolverReport {
                termination,
                iterations,
                objective,
                relative_change,
            },
            warnings,
        }
    }

    fn gradient(&self, comps: &FitComponents) -> DMatrix<f64> {
        let residual = residuals(self.design, comps);
        masked_gradient(&residual, &self.mask, self.design.omega)
    }

    fn objective(&self, comps: &FitComponents, low_rank_nuclear: f64, lambdas: Lambdas) -> f64 {
        let residual = residuals(self.design, comps);
        let gradient = masked_gradient(&residual, &self.mask, self.design.omega);
        penalized_objective(weighted_loss(&residual, &gradient), low_rank_nuclear, comps, lambdas)
    }

    /// `L ← SVT(L + η G, η λ_L)`. Returns `false` (keeping L) when the SVD fails.
    ///
    /// With Ω = I this is the soft-impute fill-in `P_O(R + L) + P_O⊥(L)`.
    fn update_low_rank(&self, comps: &mut FitComponents, low_rank_nuclear: &mut f64, lambda_l: f64) -> bool {
        let gradient = self.gradient(comps);
        let target = &comps.low_rank + gradient * self.step;
        match singular_value_threshold(&target, self.step * lambda_l) {
            Some(shrunk) => {
                *low_rank_nuclear = shrunk.nuclear_norm();
                comps.low_rank = shrunk.matrix;
                true
            }
            None => false,
        }
    }

    /// Repeat block passes (L held fixed) until the objective settles.
    fn sweep_blocks(&self, comps: &mut FitComponents) {
        let lambdas = Lambdas::new(0.0, self.lambda_h);
        let mut previous = self.objective(comps, 0.0, lambdas);
        for _ in 0..REGRESSION_SWEEPS {
            self.update_blocks(comps);
            let current = self.objective(comps, 0.0, lambdas);
            if (previous - current).abs() <= 1e-12 * previous.abs().max(1e-12) {
                break;
            }
            previous = current;
        }
    }

    /// One exact pass over α, β, H and γ.
    fn update_blocks(&self, comps: &mut FitComponents) {
        if self.opts.use_unit_fe {
            let rhs = self.gradient(comps).column_sum();
            for (i, (&b, &a)) in rhs.iter().zip(self.unit_curvature.iter()).enumerate() {
                if a > CURVATURE_EPS {
                    comps.unit_effects[i] += b / a;
                }
            }
        }

        if self.opts.use_time_fe {
            let rhs = self.gradient(comps).row_sum_tr();
            comps.time_effects += &self.time_inverse * rhs;
        }

        {
            let gradient = self.gradient(comps);
            let (p1, q1) = self.design.h_shape();
            let rhs = self.design.x_tilde.transpose() * gradient * &self.design.z_tilde;
            let rhs = DVector::from_column_slice(rhs.as_slice());
            let h = DVector::from_column_slice(comps.covariate_coefficients.as_slice());
            let descent = rhs - &h * (2.0 * self.lambda_h);
            let delta = match &self.covariate_update {
                CovariateUpdate::Exact(inverse) => inverse * descent,
                CovariateUpdate::Gradient { step } => descent * *step,
            };
            comps.covariate_coefficients += DMatrix::from_column_slice(p1, q1, delta.as_slice());
        }

        if !self.design.unit_time.is_empty() {
            let gradient = self.gradient(comps);
            let rhs = DVector::from_iterator(
                self.design.unit_time.len(),
                self.design.unit_time.iter().map(|v| v.dot(&gradient)),
            );
            comps.unit_time_coefficients += &self.unit_time_inverse * rhs;
        }
    }
}

/// `A_H[(a,b),(c,d)] = Σ_i x̃_ia x̃_ic (Z̃' D_i Ω D_i Z̃)[b,d]`, indexed by `a + b·(p+1)`.
fn covariate_normal_matrix(design: &Design<'_>, weights: &DMatrix<f64>) -> DMatrix<f64> {
    let (p1, q1) = design.h_shape();
    let dim = p1 * q1;
    let mut normal = DMatrix::zeros(dim, dim);
    let z = &design.z_tilde;

    for i in 0..design.n_units() {
        let row_mask = weights.row(i);
        if row_mask.iter().all(|&m| m == 0.0) {
            continue;
        }
        let masked_z = DMatrix::from_fn(z.nrows(), q1, |t, b| z[(t, b)] * row_mask[t]);
        let s = match design.omega {
            Some(o) => masked_z.transpose() * o * &masked_z,
            None => masked_z.transpose() * &masked_z,
        };
        let x = design.x_tilde.row(i);
        for b in 0..q1 {
            for d in 0..q1 {
                let sbd = s[(b, d)];
                if sbd == 0.0 {
                    continue;
                }
                for a in 0..p1 {
                    for c in 0..p1 {
                        normal[(a + b * p1, c + d * p1)] += x[a] * x[c] * sbd;
                    }
                }
            }
        }
    }
    normal
}
