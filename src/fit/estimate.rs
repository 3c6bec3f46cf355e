//! Estimation entry points.
//!
//! [`estimate`] runs the whole pipeline:
//! 1. validate the panel and the configuration
//! 2. derive the `λ` grids from the control cells
//! 3. select `(λ_L, λ_H)` on validation splits (skipped when both are fixed)
//! 4. refit on every control cell and complete the matrix
//! 5. average `Y - Ŷ` over treated cells
//!
//! Treated outcomes are read only in step 5.

use crate::domain::{
    CompletedMatrix, EstimationResult, EstimatorConfig, Lambdas, NumericalWarning, PanelData, Termination,
    ValidationMethod,
};
use crate::error::EstimationError;
use crate::fit::folds::build_splits;
use crate::fit::lambda_grid::{lambda_h_grid, lambda_l_grid};
use crate::fit::selection::select_lambdas;
use crate::fit::solver::{Solver, SolverOptions};
use crate::models::{fitted_values, Design};

/// Estimate the average treatment effect on treated cells.
pub fn estimate(panel: &PanelData, config: &EstimatorConfig) -> Result<EstimationResult, EstimationError> {
    panel.validate()?;
    validate_config(config)?;

    let control = panel.control_mask();
    let n_control = panel.n_control();
    let n_treated = panel.n_treated();
    if n_control == 0 {
        return Err(EstimationError::config(
            "Every cell is treated; there are no control cells to fit.",
        ));
    }
    if config.validation_method != ValidationMethod::Rolling && config.n_folds > n_control {
        return Err(EstimationError::config(format!(
            "Fold count {} exceeds the number of control cells ({n_control}).",
            config.n_folds
        )));
    }
    log::info!(
        "estimate: N={} T={} control={} treated={}",
        panel.n_units(),
        panel.n_periods(),
        n_control,
        n_treated
    );

    let design = Design::new(panel);
    let final_opts = SolverOptions::final_fit(config);
    let mut warnings = Vec::new();

    let (lambdas, search) = match (config.lambda_l, config.lambda_h) {
        (Some(lambda_l), Some(lambda_h)) => (Lambdas::new(lambda_l, lambda_h), None),
        (fixed_l, fixed_h) => {
            let probe = Solver::new(&design, &control, 0.0, final_opts);
            let l_max = if fixed_l.is_none() { probe.lambda_l_max() } else { 0.0 };
            let h_max = probe.covariate_curvature();
            let l_grid = lambda_l_grid(fixed_l, l_max, config.lambda_min_ratio, config.n_lambda)?;
            let h_grid = lambda_h_grid(
                fixed_h,
                panel.has_covariates(),
                h_max,
                config.lambda_min_ratio,
                config.n_lambda,
            )?;
            log::debug!("lambda_L,max={l_max:.4e} lambda_H,max={h_max:.4e}");

            if l_grid.len() * h_grid.len() == 1 {
                (Lambdas::new(l_grid[0], h_grid[0]), None)
            } else {
                let splits = build_splits(&control, config)?;
                let outcome = select_lambdas(&design, &splits, &l_grid, &h_grid, config);
                warnings.extend(outcome.warnings);
                (outcome.lambdas, Some(outcome.summary))
            }
        }
    };

    let solver = Solver::new(&design, &control, lambdas.lambda_h, final_opts);
    let outcome = solver.solve(lambdas.lambda_l, None);
    if !outcome.components.is_finite() {
        return Err(EstimationError::numerical(format!(
            "Final fit at lambda_L={:.4e}, lambda_H={:.4e} produced non-finite values.",
            lambdas.lambda_l, lambdas.lambda_h
        )));
    }
    for warning in &outcome.warnings {
        log::warn!("{warning}");
    }
    warnings.extend(outcome.warnings);
    if outcome.report.termination == Termination::MaxIterReached {
        let warning = NumericalWarning::NotConverged {
            iterations: outcome.report.iterations,
            relative_change: outcome.report.relative_change,
        };
        log::warn!("{warning}");
        warnings.push(warning);
    }

    let completed = fitted_values(&design, &outcome.components);
    let tau = average_treated_effect(panel, &completed);
    match tau {
        Some(tau) => log::info!("estimate: tau={tau:.6}"),
        None => log::info!("estimate: no treated cells, tau undefined"),
    }

    Ok(EstimationResult {
        tau,
        lambdas,
        completed,
        components: outcome.components,
        solver: outcome.report,
        warnings,
        search,
        n_treated,
        n_control,
    })
}

/// Complete the outcome matrix (the same pipeline as [`estimate`], without the effect).
pub fn complete_matrix(panel: &PanelData, config: &EstimatorConfig) -> Result<CompletedMatrix, EstimationError> {
    let result = estimate(panel, config)?;
    Ok(CompletedMatrix {
        completed: result.completed,
        lambdas: result.lambdas,
    })
}

/// `mean(Y - Ŷ)` over treated cells, `None` when nothing is treated.
pub fn average_treated_effect(panel: &PanelData, completed: &nalgebra::DMatrix<f64>) -> Option<f64> {
    let (sum, count) = panel
        .treated
        .iter()
        .zip(panel.outcomes.iter().zip(completed.iter()))
        .filter(|(w, _)| **w)
        .fold((0.0, 0usize), |(s, c), (_, (y, y_hat))| (s + (y - y_hat), c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Check estimator settings before any work is done.
pub fn validate_config(config: &EstimatorConfig) -> Result<(), EstimationError> {
    for (name, value) in [("lambda_l", config.lambda_l), ("lambda_h", config.lambda_h)] {
        if let Some(v) = value {
            if !(v.is_finite() && v >= 0.0) {
                return Err(EstimationError::config(format!("{name} must be finite and >= 0, got {v}.")));
            }
        }
    }
    let min_folds = match config.validation_method {
        ValidationMethod::Rolling => 1,
        ValidationMethod::Cv | ValidationMethod::Holdout => 2,
    };
    if config.n_folds < min_folds {
        return Err(EstimationError::config(format!(
            "n_folds must be >= {min_folds} for {:?} validation, got {}.",
            config.validation_method, config.n_folds
        )));
    }
    if config.max_window_size == Some(0) {
        return Err(EstimationError::config("max_window_size must be >= 1."));
    }
    if config.n_lambda == 0 {
        return Err(EstimationError::config("n_lambda must be >= 1."));
    }
    if !(config.lambda_min_ratio.is_finite() && config.lambda_min_ratio > 0.0 && config.lambda_min_ratio <= 1.0) {
        return Err(EstimationError::config(format!(
            "lambda_min_ratio must be in (0, 1], got {}.",
            config.lambda_min_ratio
        )));
    }
    for (name, iters, tol) in [
        ("max_iter/tol", config.max_iter, config.tol),
        ("validation_max_iter/validation_tol", config.validation_max_iter, config.validation_tol),
    ] {
        if iters == 0 || !(tol.is_finite() && tol > 0.0) {
            return Err(EstimationError::config(format!(
                "{name} must be >= 1 and a finite positive tolerance, got {iters}/{tol}."
            )));
        }
    }
    Ok(())
}
