//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{EstimationResult, EstimatorConfig, PanelData, SearchSummary};
use crate::report::PeriodEffect;

/// Format the full run summary (panel shape, selected λ, solver diagnostics, τ).
pub fn format_run_summary(
    panel: &PanelData,
    result: &EstimationResult,
    config: &EstimatorConfig,
    true_effect: Option<f64>,
) -> String {
    let mut out = String::new();

    out.push_str("=== mcnnm - Matrix Completion with Nuclear Norm Minimization ===\n");
    out.push_str(&format!(
        "Panel: N={} T={} | control={} treated={}\n",
        panel.n_units(),
        panel.n_periods(),
        result.n_control,
        result.n_treated
    ));
    out.push_str(&format!(
        "Covariates: unit={} time={} unit-time={} | omega={}\n",
        panel.n_unit_covariates(),
        panel.n_time_covariates(),
        panel.unit_time_covariates.len(),
        if panel.omega.is_some() { "custom" } else { "identity" }
    ));
    out.push_str(&format!(
        "Fixed effects: unit={} time={}\n",
        on_off(config.use_unit_fe),
        on_off(config.use_time_fe)
    ));

    match &result.search {
        Some(search) => out.push_str(&format_search(search)),
        None => out.push_str("\nSearch: skipped (fixed lambdas)\n"),
    }

    out.push_str("\nSelected:\n");
    out.push_str(&format!("- lambda_L: {:.6e}\n", result.lambdas.lambda_l));
    out.push_str(&format!("- lambda_H: {:.6e}\n", result.lambdas.lambda_h));

    out.push_str("\nFinal fit:\n");
    out.push_str(&format!(
        "- {} after {} iterations (objective {:.6e}, last rel. change {:.3e})\n",
        if result.converged() { "converged" } else { "iteration cap reached" },
        result.solver.iterations, result.solver.objective, result.solver.relative_change
    ));
    out.push_str(&format!(
        "- rank(L) = {} | ||H||_F = {:.4}\n",
        effective_rank(&result.components.low_rank),
        result.components.covariate_coefficients.norm()
    ));

    out.push_str("\nTreatment effect:\n");
    match result.tau {
        Some(tau) => out.push_str(&format!("- tau: {tau:.6}\n")),
        None => out.push_str("- tau: n/a (no treated cells)\n"),
    }
    if let Some(truth) = true_effect {
        out.push_str(&format!("- true effect: {truth:.6}\n"));
        if let Some(tau) = result.tau {
            out.push_str(&format!("- error: {:+.6}\n", tau - truth));
        }
    }

    if !result.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &result.warnings {
            out.push_str(&format!("- {w}\n"));
        }
    }

    out
}

/// Format the grid search outcome (grids + best few scores).
pub fn format_search(search: &SearchSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\nSearch: {:?} / {:?}, {} split(s), {} x {} grid\n",
        search.method,
        search.mode,
        search.n_splits,
        search.lambda_l_grid.len(),
        search.lambda_h_grid.len()
    ));
    out.push_str(&format!("- lambda_L grid: {}\n", fmt_range(&search.lambda_l_grid)));
    out.push_str(&format!("- lambda_H grid: {}\n", fmt_range(&search.lambda_h_grid)));

    let mut ranked: Vec<_> = search.scores.iter().filter(|s| s.score.is_finite()).collect();
    ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
    out.push_str(&format!("{:>14} {:>14} {:>14}\n", "lambda_L", "lambda_H", "cv_mse"));
    out.push_str(&format!("{:->14} {:->14} {:->14}\n", "", "", ""));
    for s in ranked.iter().take(5) {
        let chosen = if s.lambdas == search.selected { " *" } else { "" };
        out.push_str(&format!(
            "{:>14.6e} {:>14.6e} {:>14.6e}{chosen}\n",
            s.lambdas.lambda_l, s.lambdas.lambda_h, s.score
        ));
    }
    out
}

/// Format per-period treated effects.
pub fn format_period_effects(effects: &[PeriodEffect]) -> String {
    let mut out = String::new();
    if effects.is_empty() {
        return out;
    }
    out.push_str("Effect by period:\n");
    out.push_str(&format!("{:>8} {:>8} {:>12}\n", "period", "cells", "effect"));
    out.push_str(&format!("{:->8} {:->8} {:->12}\n", "", "", ""));
    for e in effects {
        out.push_str(&format!("{:>8} {:>8} {:>12.4}\n", e.period, e.treated_cells, e.effect));
    }
    out
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn fmt_range(v: &[f64]) -> String {
    match v {
        [] => "[]".to_string(),
        [only] => format!("[{only:.4e}]"),
        [first, .., last] => format!("[{first:.4e} .. {last:.4e}] ({} values)", v.len()),
    }
}

fn effective_rank(m: &nalgebra::DMatrix<f64>) -> usize {
    if m.is_empty() {
        return 0;
    }
    let sv = m.singular_values();
    let top = sv.max();
    if top <= 0.0 {
        return 0;
    }
    sv.iter().filter(|&&s| s > top * 1e-8).count()
}
