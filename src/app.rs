//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - resolves the estimator config (TOML file + flag overrides)
//! - runs the estimation pipeline
//! - prints the report and writes optional exports

use std::path::Path;

use clap::Parser;

use crate::cli::{Command, EstimatorArgs, FitArgs, SimulateArgs};
use crate::data::SimulationConfig;
use crate::domain::EstimatorConfig;
use crate::error::EstimationError;
use crate::io::PanelFiles;

pub mod pipeline;

/// Entry point for the `mcnnm` binary.
pub fn run() -> Result<(), EstimationError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Fit(args) => handle_fit(args),
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<(), EstimationError> {
    let config = estimator_config_from_args(&args.estimator)?;
    let simulation = simulation_config_from_args(&args);
    let run = pipeline::run_simulation(&simulation, &config)?;
    present(&run, &config, &args.estimator)
}

fn handle_fit(args: FitArgs) -> Result<(), EstimationError> {
    let config = estimator_config_from_args(&args.estimator)?;
    let files = PanelFiles {
        outcomes: args.outcomes,
        treatment: args.treatment,
        unit_covariates: args.unit_covariates,
        time_covariates: args.time_covariates,
        omega: args.omega,
    };
    let run = pipeline::run_fit(&files, &config)?;
    present(&run, &config, &args.estimator)
}

fn present(run: &pipeline::RunOutput, config: &EstimatorConfig, args: &EstimatorArgs) -> Result<(), EstimationError> {
    println!(
        "{}",
        crate::report::format_run_summary(&run.panel, &run.result, config, run.true_effect)
    );
    if args.by_period {
        println!("{}", crate::report::format_period_effects(&run.period_effects));
    }

    // Optional exports.
    if let Some(path) = &args.export_completed {
        crate::io::write_matrix_csv(path, &run.result.completed)?;
        log::info!("wrote completed matrix to '{}'", path.display());
    }
    if let Some(path) = &args.export_result {
        crate::io::write_result_json(path, &run.result)?;
        log::info!("wrote result to '{}'", path.display());
    }

    Ok(())
}

/// Read an `EstimatorConfig` from a TOML file; missing keys take their defaults.
pub fn load_config(path: &Path) -> Result<EstimatorConfig, EstimationError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EstimationError::io(format!("Failed to read config '{}': {e}", path.display())))?;
    toml::from_str(&text)
        .map_err(|e| EstimationError::config(format!("Failed to parse config '{}': {e}", path.display())))
}

/// Resolve the estimator config: file values first, then flag overrides.
pub fn estimator_config_from_args(args: &EstimatorArgs) -> Result<EstimatorConfig, EstimationError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EstimatorConfig::default(),
    };

    if let Some(v) = args.lambda_l {
        config.lambda_l = Some(v);
    }
    if let Some(v) = args.lambda_h {
        config.lambda_h = Some(v);
    }
    if let Some(v) = args.validation {
        config.validation_method = v;
    }
    if let Some(v) = args.folds {
        config.n_folds = v;
    }
    if let Some(v) = args.n_lambda {
        config.n_lambda = v;
    }
    if let Some(v) = args.search {
        config.search_mode = v;
    }
    if let Some(v) = args.max_window_size {
        config.max_window_size = Some(v);
    }
    if let Some(v) = args.init {
        config.init = v;
    }
    if let Some(v) = args.max_iter {
        config.max_iter = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if args.no_unit_fe {
        config.use_unit_fe = false;
    }
    if args.no_time_fe {
        config.use_time_fe = false;
    }

    Ok(config)
}

pub fn simulation_config_from_args(args: &SimulateArgs) -> SimulationConfig {
    SimulationConfig {
        units: args.units,
        periods: args.periods,
        rank: args.rank,
        effect: args.effect,
        treated_fraction: args.treated_fraction,
        noise: args.noise,
        adoption: args.adoption,
        unit_covariates: args.unit_covariates,
        time_covariates: args.time_covariates,
        seed: args.data_seed,
    }
}
