//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - loaded from TOML (configuration) or exported to JSON (results)
//! - reloaded later for inspection

use std::fmt;

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::EstimationError;

/// How held-out error is produced when selecting `(λ_L, λ_H)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    /// K-fold cross-validation over the control cells.
    Cv,
    /// A single random split: one fold of the K-fold partition is held out.
    Holdout,
    /// Forward-chaining splits along the time axis.
    ///
    /// Split `k` trains on control cells before `initial_window + k * step_size`
    /// and validates the next `horizon` periods.
    Rolling,
}

/// How the two-dimensional `(λ_L, λ_H)` grid is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Score every `(λ_L, λ_H)` pair.
    Joint,
    /// Select `λ_L` with `λ_H` held at a default, then `λ_H` with `λ_L` fixed.
    Staged,
}

/// Solver starting point when no warm start is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InitStrategy {
    /// All parameters start at zero.
    Zero,
    /// Fixed effects and covariate coefficients are pre-fit with `L = 0`.
    Regression,
}

/// A balanced N×T panel plus optional covariates.
///
/// `treated[(i, t)] == true` marks a cell whose untreated outcome is unknown;
/// those outcomes never enter a fit.
#[derive(Debug, Clone)]
pub struct PanelData {
    /// Outcomes Y (N×T).
    pub outcomes: DMatrix<f64>,
    /// Treatment mask W (N×T).
    pub treated: DMatrix<bool>,
    /// Unit covariates X (N×p).
    pub unit_covariates: Option<DMatrix<f64>>,
    /// Time covariates Z (T×q).
    pub time_covariates: Option<DMatrix<f64>>,
    /// Unit-time covariates V, one N×T matrix per covariate.
    pub unit_time_covariates: Vec<DMatrix<f64>>,
    /// Temporal weighting matrix Ω (T×T). `None` means identity.
    pub omega: Option<DMatrix<f64>>,
}

impl PanelData {
    pub fn new(outcomes: DMatrix<f64>, treated: DMatrix<bool>) -> Self {
        Self {
            outcomes,
            treated,
            unit_covariates: None,
            time_covariates: None,
            unit_time_covariates: Vec::new(),
            omega: None,
        }
    }

    /// Build a panel from a numeric 0/1 treatment matrix.
    pub fn from_binary_treatment(
        outcomes: DMatrix<f64>,
        treatment: &DMatrix<f64>,
    ) -> Result<Self, EstimationError> {
        if let Some(bad) = treatment.iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(EstimationError::input(format!(
                "Treatment matrix must contain only 0 and 1, found {bad}."
            )));
        }
        let treated = treatment.map(|v| v == 1.0);
        Ok(Self::new(outcomes, treated))
    }

    pub fn with_unit_covariates(mut self, x: DMatrix<f64>) -> Self {
        self.unit_covariates = Some(x);
        self
    }

    pub fn with_time_covariates(mut self, z: DMatrix<f64>) -> Self {
        self.time_covariates = Some(z);
        self
    }

    pub fn with_unit_time_covariates(mut self, v: Vec<DMatrix<f64>>) -> Self {
        self.unit_time_covariates = v;
        self
    }

    pub fn with_omega(mut self, omega: DMatrix<f64>) -> Self {
        self.omega = Some(omega);
        self
    }

    pub fn n_units(&self) -> usize {
        self.outcomes.nrows()
    }

    pub fn n_periods(&self) -> usize {
        self.outcomes.ncols()
    }

    pub fn n_treated(&self) -> usize {
        self.treated.iter().filter(|&&w| w).count()
    }

    pub fn n_control(&self) -> usize {
        self.treated.len() - self.n_treated()
    }

    /// Mask of cells usable for fitting (the complement of `treated`).
    pub fn control_mask(&self) -> DMatrix<bool> {
        self.treated.map(|w| !w)
    }

    /// Number of unit covariates `p` (before the intercept column is added).
    pub fn n_unit_covariates(&self) -> usize {
        self.unit_covariates.as_ref().map_or(0, |x| x.ncols())
    }

    /// Number of time covariates `q` (before the intercept column is added).
    pub fn n_time_covariates(&self) -> usize {
        self.time_covariates.as_ref().map_or(0, |z| z.ncols())
    }

    pub fn has_covariates(&self) -> bool {
        self.n_unit_covariates() > 0 || self.n_time_covariates() > 0
    }

    /// Check the shape contract and the finiteness of every input.
    pub fn validate(&self) -> Result<(), EstimationError> {
        let (n, t) = self.outcomes.shape();
        if n == 0 || t == 0 {
            return Err(EstimationError::shape(format!("Outcome matrix is empty ({n}x{t}).")));
        }
        if self.treated.shape() != (n, t) {
            let (wn, wt) = self.treated.shape();
            return Err(EstimationError::shape(format!(
                "Treatment mask is {wn}x{wt} but outcomes are {n}x{t}."
            )));
        }
        if let Some(x) = &self.unit_covariates {
            if x.nrows() != n {
                return Err(EstimationError::shape(format!(
                    "Unit covariates have {} rows, expected N={n}.",
                    x.nrows()
                )));
            }
        }
        if let Some(z) = &self.time_covariates {
            if z.nrows() != t {
                return Err(EstimationError::shape(format!(
                    "Time covariates have {} rows, expected T={t}.",
                    z.nrows()
                )));
            }
        }
        for (j, v) in self.unit_time_covariates.iter().enumerate() {
            if v.shape() != (n, t) {
                let (vn, vt) = v.shape();
                return Err(EstimationError::shape(format!(
                    "Unit-time covariate {j} is {vn}x{vt}, expected {n}x{t}."
                )));
            }
        }
        if let Some(omega) = &self.omega {
            if omega.shape() != (t, t) {
                let (on, ot) = omega.shape();
                return Err(EstimationError::shape(format!(
                    "Omega is {on}x{ot}, expected {t}x{t}."
                )));
            }
        }

        ensure_finite("outcomes", &self.outcomes)?;
        if let Some(x) = &self.unit_covariates {
            ensure_finite("unit covariates", x)?;
        }
        if let Some(z) = &self.time_covariates {
            ensure_finite("time covariates", z)?;
        }
        for v in &self.unit_time_covariates {
            ensure_finite("unit-time covariates", v)?;
        }
        if let Some(omega) = &self.omega {
            ensure_finite("omega", omega)?;
            validate_omega(omega)?;
        }
        Ok(())
    }
}

fn ensure_finite(label: &str, m: &DMatrix<f64>) -> Result<(), EstimationError> {
    if let Some(((i, j), _)) = m
        .iter()
        .enumerate()
        .map(|(k, v)| ((k % m.nrows(), k / m.nrows()), v))
        .find(|(_, v)| !v.is_finite())
    {
        return Err(EstimationError::input(format!(
            "Non-finite value in {label} at ({i}, {j})."
        )));
    }
    Ok(())
}

fn validate_omega(omega: &DMatrix<f64>) -> Result<(), EstimationError> {
    let scale = omega.amax().max(1.0);
    let asym = (omega - omega.transpose()).amax();
    if asym > 1e-8 * scale {
        return Err(EstimationError::input(format!(
            "Omega must be symmetric (max asymmetry {asym:.3e})."
        )));
    }
    let eig = omega.clone().symmetric_eigen().eigenvalues;
    let min = eig.min();
    let max = eig.max();
    if max <= 0.0 || min < -1e-10 * scale {
        return Err(EstimationError::input(format!(
            "Omega must be positive semi-definite with a positive eigenvalue (eigenvalues in [{min:.3e}, {max:.3e}])."
        )));
    }
    Ok(())
}

/// Estimator configuration.
///
/// Every field has a default so partial TOML files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub use_unit_fe: bool,
    pub use_time_fe: bool,

    /// Fixed `λ_L`. When both lambdas are set the search is skipped.
    pub lambda_l: Option<f64>,
    /// Fixed `λ_H`.
    pub lambda_h: Option<f64>,

    pub validation_method: ValidationMethod,
    /// Fold count K (also the number of rolling splits).
    pub n_folds: usize,
    /// Grid size per lambda.
    pub n_lambda: usize,
    /// Smallest grid value as a fraction of the data-derived maximum.
    pub lambda_min_ratio: f64,
    pub search_mode: SearchMode,
    pub init: InitStrategy,

    /// Iteration cap for the final fit.
    pub max_iter: usize,
    /// Relative objective tolerance for the final fit.
    pub tol: f64,
    /// Iteration cap for fits scored during the search.
    pub validation_max_iter: usize,
    /// Relative objective tolerance for fits scored during the search.
    pub validation_tol: f64,

    /// Seed for the fold permutation.
    pub seed: u64,

    /// Rolling validation: periods in the first training window.
    pub initial_window: Option<usize>,
    /// Rolling validation: periods the window advances per split.
    pub step_size: Option<usize>,
    /// Rolling validation: periods validated per split.
    pub horizon: Option<usize>,
    /// Rolling validation: only the last `max_window_size` periods are split.
    pub max_window_size: Option<usize>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            use_unit_fe: true,
            use_time_fe: true,
            lambda_l: None,
            lambda_h: None,
            validation_method: ValidationMethod::Cv,
            n_folds: 5,
            n_lambda: 20,
            lambda_min_ratio: 1e-3,
            search_mode: SearchMode::Joint,
            init: InitStrategy::Zero,
            max_iter: 1000,
            tol: 1e-6,
            validation_max_iter: 200,
            validation_tol: 1e-5,
            seed: 0,
            initial_window: None,
            step_size: None,
            horizon: None,
            max_window_size: None,
        }
    }
}

/// A `(λ_L, λ_H)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lambdas {
    pub lambda_l: f64,
    pub lambda_h: f64,
}

impl Lambdas {
    pub fn new(lambda_l: f64, lambda_h: f64) -> Self {
        Self { lambda_l, lambda_h }
    }
}

/// Fitted model components.
///
/// Fitted value at `(i, t)` is
/// `L[i,t] + (X̃ H Z̃')[i,t] + Σ_j V_j[i,t] γ_j + α_i + β_t`
/// where `X̃ = [X, 1]` and `Z̃ = [Z, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitComponents {
    /// Low-rank baseline L (N×T).
    pub low_rank: DMatrix<f64>,
    /// Covariate coefficients H ((p+1)×(q+1)); `H[(p, q)]` is the grand intercept.
    pub covariate_coefficients: DMatrix<f64>,
    /// Unit fixed effects α (zero when disabled).
    pub unit_effects: DVector<f64>,
    /// Time fixed effects β (zero when disabled).
    pub time_effects: DVector<f64>,
    /// Unit-time covariate coefficients γ.
    pub unit_time_coefficients: DVector<f64>,
}

impl FitComponents {
    pub fn zeros(n_units: usize, n_periods: usize, h_rows: usize, h_cols: usize, n_unit_time: usize) -> Self {
        Self {
            low_rank: DMatrix::zeros(n_units, n_periods),
            covariate_coefficients: DMatrix::zeros(h_rows, h_cols),
            unit_effects: DVector::zeros(n_units),
            time_effects: DVector::zeros(n_periods),
            unit_time_coefficients: DVector::zeros(n_unit_time),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.low_rank.iter().all(|v| v.is_finite())
            && self.covariate_coefficients.iter().all(|v| v.is_finite())
            && self.unit_effects.iter().all(|v| v.is_finite())
            && self.time_effects.iter().all(|v| v.is_finite())
            && self.unit_time_coefficients.iter().all(|v| v.is_finite())
    }
}

/// Why a solver run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative objective change fell below the tolerance.
    Converged,
    /// The iteration cap was hit first; the last iterate is used.
    MaxIterReached,
}

/// Diagnostics for a single solver run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
    pub termination: Termination,
    pub iterations: usize,
    /// Penalized objective at the last iterate.
    pub objective: f64,
    /// Relative objective change of the last iteration.
    pub relative_change: f64,
}

/// Non-fatal numerical conditions surfaced alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumericalWarning {
    /// The final fit hit `max_iter` before meeting the tolerance.
    NotConverged {
        iterations: usize,
        relative_change: f64,
    },
    /// Some validation fits hit their iteration cap.
    ValidationNotConverged { fits: usize, total: usize },
    /// Some validation fits kept a stale low-rank iterate after an SVD failure.
    ValidationSvdFailure { fits: usize, total: usize },
    /// The SVD in the L-step failed or returned non-finite factors; L was kept.
    SvdFailure { iteration: usize },
    /// No grid point produced a finite validation score.
    NoFiniteScores { fallback: Lambdas },
}

impl fmt::Display for NumericalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericalWarning::NotConverged {
                iterations,
                relative_change,
            } => write!(
                f,
                "solver did not fully converge after {iterations} iterations (last relative change {relative_change:.3e})"
            ),
            NumericalWarning::ValidationNotConverged { fits, total } => {
                write!(f, "{fits} of {total} validation fits hit their iteration cap")
            }
            NumericalWarning::ValidationSvdFailure { fits, total } => {
                write!(f, "SVD failed in {fits} of {total} validation fits")
            }
            NumericalWarning::SvdFailure { iteration } => {
                write!(f, "SVD failed at iteration {iteration}; previous low-rank iterate kept")
            }
            NumericalWarning::NoFiniteScores { fallback } => write!(
                f,
                "no finite validation score; fell back to lambda_L={:.4e}, lambda_H={:.4e}",
                fallback.lambda_l, fallback.lambda_h
            ),
        }
    }
}

/// Validation score of one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridScore {
    pub lambdas: Lambdas,
    /// Mean held-out MSE across validation splits.
    pub score: f64,
}

/// What the hyperparameter search looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub method: ValidationMethod,
    pub mode: SearchMode,
    pub n_splits: usize,
    pub lambda_l_grid: Vec<f64>,
    pub lambda_h_grid: Vec<f64>,
    pub scores: Vec<GridScore>,
    pub selected: Lambdas,
}

/// Output of [`crate::fit::estimate`]. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    /// Average treatment effect on treated cells (`None` without treated cells).
    pub tau: Option<f64>,
    pub lambdas: Lambdas,
    /// Completed outcome matrix Ŷ, evaluated on every cell.
    pub completed: DMatrix<f64>,
    pub components: FitComponents,
    pub solver: SolverReport,
    pub warnings: Vec<NumericalWarning>,
    pub search: Option<SearchSummary>,
    pub n_treated: usize,
    pub n_control: usize,
}

impl EstimationResult {
    /// Per-cell effects `Y - Ŷ` on treated cells, `None` elsewhere.
    pub fn cell_effects(&self, panel: &PanelData) -> DMatrix<Option<f64>> {
        DMatrix::from_fn(panel.n_units(), panel.n_periods(), |i, t| {
            panel.treated[(i, t)].then(|| panel.outcomes[(i, t)] - self.completed[(i, t)])
        })
    }

    pub fn converged(&self) -> bool {
        self.solver.termination == Termination::Converged
    }
}

/// Output of [`crate::fit::complete_matrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedMatrix {
    pub completed: DMatrix<f64>,
    pub lambdas: Lambdas,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(n: usize, t: usize) -> PanelData {
        PanelData::new(DMatrix::from_element(n, t, 1.0), DMatrix::from_element(n, t, false))
    }

    #[test]
    fn mask_shape_mismatch_is_a_shape_error() {
        let mut p = panel(3, 4);
        p.treated = DMatrix::from_element(3, 5, false);
        assert!(matches!(p.validate(), Err(EstimationError::InputShape(_))));
    }

    #[test]
    fn covariate_rows_must_match() {
        let p = panel(3, 4).with_unit_covariates(DMatrix::zeros(2, 1));
        assert!(matches!(p.validate(), Err(EstimationError::InputShape(_))));

        let p = panel(3, 4).with_time_covariates(DMatrix::zeros(3, 1));
        assert!(matches!(p.validate(), Err(EstimationError::InputShape(_))));

        let p = panel(3, 4).with_unit_time_covariates(vec![DMatrix::zeros(4, 3)]);
        assert!(matches!(p.validate(), Err(EstimationError::InputShape(_))));

        let p = panel(3, 4).with_omega(DMatrix::identity(3, 3));
        assert!(matches!(p.validate(), Err(EstimationError::InputShape(_))));
    }

    #[test]
    fn non_finite_outcome_is_rejected() {
        let mut p = panel(2, 2);
        p.outcomes[(1, 0)] = f64::NAN;
        let err = p.validate().unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
        assert!(err.to_string().contains("(1, 0)"));
    }

    #[test]
    fn omega_must_be_symmetric_psd() {
        let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 1.0]);
        assert!(matches!(
            panel(2, 2).with_omega(asym).validate(),
            Err(EstimationError::InvalidInput(_))
        ));

        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(
            panel(2, 2).with_omega(indefinite).validate(),
            Err(EstimationError::InvalidInput(_))
        ));

        let ar1 = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        assert!(panel(2, 2).with_omega(ar1).validate().is_ok());
    }

    #[test]
    fn binary_treatment_rejects_other_values() {
        let y = DMatrix::zeros(2, 2);
        let w = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.5, 0.0]);
        assert!(PanelData::from_binary_treatment(y.clone(), &w).is_err());

        let w = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let p = PanelData::from_binary_treatment(y, &w).unwrap();
        assert_eq!(p.n_treated(), 2);
        assert_eq!(p.n_control(), 2);
        assert!(p.control_mask()[(0, 0)]);
    }

    #[test]
    fn config_defaults_fill_partial_toml() {
        let cfg: EstimatorConfig = toml::from_str("n_folds = 3\nvalidation_method = \"holdout\"").unwrap();
        assert_eq!(cfg.n_folds, 3);
        assert_eq!(cfg.validation_method, ValidationMethod::Holdout);
        assert_eq!(cfg.n_lambda, EstimatorConfig::default().n_lambda);
        assert!(cfg.use_unit_fe);
    }
}
