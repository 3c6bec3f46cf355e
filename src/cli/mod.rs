//! Command-line parsing for the MC-NNM estimator.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::data::Adoption;
use crate::domain::{InitStrategy, SearchMode, ValidationMethod};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "mcnnm", version, about = "Panel treatment effects via nuclear-norm matrix completion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a synthetic panel, estimate it, and compare with the true effect.
    Simulate(SimulateArgs),
    /// Estimate the treatment effect for panel matrices stored as CSV.
    Fit(FitArgs),
}

/// Options for the synthetic demo.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Number of units (rows).
    #[arg(long, default_value_t = 50)]
    pub units: usize,

    /// Number of periods (columns).
    #[arg(long, default_value_t = 10)]
    pub periods: usize,

    /// Rank of the factor term.
    #[arg(long, default_value_t = 2)]
    pub rank: usize,

    /// Additive effect on treated cells.
    #[arg(long, default_value_t = 5.0)]
    pub effect: f64,

    /// Target share of treated cells.
    #[arg(long, default_value_t = 0.1)]
    pub treated_fraction: f64,

    /// Noise standard deviation.
    #[arg(long, default_value_t = 0.5)]
    pub noise: f64,

    /// Treatment adoption pattern.
    #[arg(long, value_enum, default_value_t = Adoption::Staggered)]
    pub adoption: Adoption,

    /// Number of generated unit covariates.
    #[arg(long, default_value_t = 0)]
    pub unit_covariates: usize,

    /// Number of generated time covariates.
    #[arg(long, default_value_t = 0)]
    pub time_covariates: usize,

    /// Random seed for panel generation.
    #[arg(long = "data-seed", default_value_t = 42)]
    pub data_seed: u64,

    #[command(flatten)]
    pub estimator: EstimatorArgs,
}

/// Options for fitting CSV inputs.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Outcome matrix Y (N×T, headerless CSV).
    #[arg(long, value_name = "CSV")]
    pub outcomes: PathBuf,

    /// Treatment matrix W (N×T, 0/1).
    #[arg(long, value_name = "CSV")]
    pub treatment: PathBuf,

    /// Unit covariates X (N×p).
    #[arg(long, value_name = "CSV")]
    pub unit_covariates: Option<PathBuf>,

    /// Time covariates Z (T×q).
    #[arg(long, value_name = "CSV")]
    pub time_covariates: Option<PathBuf>,

    /// Temporal weighting matrix Ω (T×T).
    #[arg(long, value_name = "CSV")]
    pub omega: Option<PathBuf>,

    #[command(flatten)]
    pub estimator: EstimatorArgs,
}

/// Estimator settings shared by every subcommand.
///
/// Flags override values loaded from `--config`.
#[derive(Debug, Args, Clone, Default)]
pub struct EstimatorArgs {
    /// Estimator configuration (TOML).
    #[arg(long, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Fix λ_L instead of selecting it.
    #[arg(long)]
    pub lambda_l: Option<f64>,

    /// Fix λ_H instead of selecting it.
    #[arg(long)]
    pub lambda_h: Option<f64>,

    /// Validation method for the λ search.
    #[arg(long, value_enum)]
    pub validation: Option<ValidationMethod>,

    /// Number of folds (or rolling splits).
    #[arg(long)]
    pub folds: Option<usize>,

    /// Grid size per λ.
    #[arg(long)]
    pub n_lambda: Option<usize>,

    /// Joint or staged λ search.
    #[arg(long, value_enum)]
    pub search: Option<SearchMode>,

    /// Rolling validation: only split the last N periods.
    #[arg(long, value_name = "N")]
    pub max_window_size: Option<usize>,

    /// Solver starting point.
    #[arg(long, value_enum)]
    pub init: Option<InitStrategy>,

    /// Iteration cap for the final fit.
    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Seed for the fold partition.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Disable unit fixed effects.
    #[arg(long)]
    pub no_unit_fe: bool,

    /// Disable time fixed effects.
    #[arg(long)]
    pub no_time_fe: bool,

    /// Print the per-period effect table.
    #[arg(long)]
    pub by_period: bool,

    /// Export the completed matrix to CSV.
    #[arg(long = "export-completed", value_name = "CSV")]
    pub export_completed: Option<PathBuf>,

    /// Export the full result to JSON.
    #[arg(long = "export-result", value_name = "JSON")]
    pub export_result: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_command_parses_paths_and_overrides() {
        let cli = Cli::parse_from([
            "mcnnm",
            "fit",
            "--outcomes",
            "y.csv",
            "--treatment",
            "w.csv",
            "--validation",
            "rolling",
            "--folds",
            "3",
            "--lambda-h",
            "0",
        ]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.outcomes, PathBuf::from("y.csv"));
        assert_eq!(args.estimator.validation, Some(ValidationMethod::Rolling));
        assert_eq!(args.estimator.folds, Some(3));
        assert_eq!(args.estimator.lambda_h, Some(0.0));
        assert!(args.estimator.lambda_l.is_none());
    }

    #[test]
    fn simulate_defaults_match_the_demo() {
        let cli = Cli::parse_from(["mcnnm", "simulate", "--adoption", "block", "--search", "staged"]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.units, 50);
        assert_eq!(args.periods, 10);
        assert_eq!(args.adoption, Adoption::Block);
        assert_eq!(args.estimator.search, Some(SearchMode::Staged));
    }
}
