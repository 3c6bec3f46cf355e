//! Shared estimation pipeline used by both subcommands.
//!
//! Workflow: panel (simulated or loaded) -> validate -> λ search -> final fit ->
//! τ + per-period effects. The CLI layer only decides where the panel comes
//! from and how the outputs are presented.

use crate::data::{SimulationConfig, generate_panel};
use crate::domain::{EstimationResult, EstimatorConfig, PanelData};
use crate::error::EstimationError;
use crate::io::{PanelFiles, load_panel};
use crate::report::PeriodEffect;

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub panel: PanelData,
    pub result: EstimationResult,
    pub period_effects: Vec<PeriodEffect>,
    /// Known effect when the panel was simulated.
    pub true_effect: Option<f64>,
}

/// Generate a synthetic panel and estimate it.
pub fn run_simulation(
    simulation: &SimulationConfig,
    config: &EstimatorConfig,
) -> Result<RunOutput, EstimationError> {
    let simulated = generate_panel(simulation)?;
    log::info!(
        "simulated {}x{} panel (rank {}, effect {}, {} treated cells)",
        simulation.units,
        simulation.periods,
        simulation.rank,
        simulated.true_effect,
        simulated.panel.n_treated()
    );
    run_panel(simulated.panel, config, Some(simulated.true_effect))
}

/// Load CSV matrices and estimate them.
pub fn run_fit(files: &PanelFiles, config: &EstimatorConfig) -> Result<RunOutput, EstimationError> {
    let panel = load_panel(files)?;
    run_panel(panel, config, None)
}

fn run_panel(
    panel: PanelData,
    config: &EstimatorConfig,
    true_effect: Option<f64>,
) -> Result<RunOutput, EstimationError> {
    let result = crate::fit::estimate(&panel, config)?;
    for warning in &result.warnings {
        log::warn!("{warning}");
    }
    let period_effects = crate::report::period_effects(&panel, &result);

    Ok(RunOutput {
        panel,
        result,
        period_effects,
        true_effect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_run_reports_the_true_effect() {
        let simulation = SimulationConfig {
            units: 12,
            periods: 6,
            effect: 3.0,
            ..SimulationConfig::default()
        };
        let config = EstimatorConfig {
            lambda_l: Some(0.5),
            lambda_h: Some(0.0),
            ..EstimatorConfig::default()
        };
        let run = run_simulation(&simulation, &config).unwrap();
        assert_eq!(run.true_effect, Some(3.0));
        assert_eq!(run.panel.n_units(), 12);
        assert!(run.result.tau.is_some());
        assert!(!run.period_effects.is_empty());
    }

    #[test]
    fn missing_files_are_io_errors() {
        let files = PanelFiles {
            outcomes: "does/not/exist.csv".into(),
            treatment: "does/not/exist.csv".into(),
            unit_covariates: None,
            time_covariates: None,
            omega: None,
        };
        let err = run_fit(&files, &EstimatorConfig::default()).unwrap_err();
        assert!(matches!(err, EstimationError::Io(_)));
    }
}
