//! Synthetic panel generation.
//!
//! The untreated outcome is
//!
//! ```text
//! Y(0) = U V' + X̃ H Z̃' + α 1' + 1 β' + ε
//! ```
//!
//! with a rank-`r` factor term, Gaussian covariates, Gaussian fixed effects and
//! Gaussian noise. Treated cells receive an additive effect `τ`.

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::PanelData;
use crate::error::EstimationError;
use crate::models::model::with_intercept;

/// Treatment assignment pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Adoption {
    /// Each treated unit starts at its own period in `[T/2, T-1]` and stays treated.
    Staggered,
    /// All treated units start at period `T/2`.
    Block,
}

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub units: usize,
    pub periods: usize,
    pub rank: usize,
    pub effect: f64,
    /// Target share of treated cells.
    pub treated_fraction: f64,
    /// Noise standard deviation.
    pub noise: f64,
    pub adoption: Adoption,
    pub unit_covariates: usize,
    pub time_covariates: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            units: 50,
            periods: 10,
            rank: 2,
            effect: 5.0,
            treated_fraction: 0.1,
            noise: 0.5,
            adoption: Adoption::Staggered,
            unit_covariates: 0,
            time_covariates: 0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedPanel {
    pub panel: PanelData,
    pub true_effect: f64,
    /// Noise-free untreated outcomes.
    pub baseline: DMatrix<f64>,
}

pub fn generate_panel(config: &SimulationConfig) -> Result<SimulatedPanel, EstimationError> {
    let (n, t) = (config.units, config.periods);
    if n < 2 || t < 2 {
        return Err(EstimationError::config(format!(
            "Simulation needs at least 2 units and 2 periods, got {n}x{t}."
        )));
    }
    if config.rank == 0 || config.rank > n.min(t) {
        return Err(EstimationError::config(format!(
            "Simulation rank must be in 1..={}, got {}.",
            n.min(t),
            config.rank
        )));
    }
    if !(config.treated_fraction.is_finite() && (0.0..1.0).contains(&config.treated_fraction)) {
        return Err(EstimationError::config("Treated fraction must be in [0, 1)."));
    }
    if !(config.noise.is_finite() && config.noise >= 0.0 && config.effect.is_finite()) {
        return Err(EstimationError::config("Noise must be finite and >= 0; effect must be finite."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let standard = Normal::new(0.0, 1.0)
        .map_err(|e| EstimationError::config(format!("Distribution error: {e}")))?;
    let noise = Normal::new(0.0, config.noise)
        .map_err(|e| EstimationError::config(format!("Noise distribution error: {e}")))?;

    // Scale factors so each rank component has unit variance per cell.
    let scale = 1.0 / (config.rank as f64).sqrt();
    let u = DMatrix::from_fn(n, config.rank, |_, _| standard.sample(&mut rng));
    let v = DMatrix::from_fn(t, config.rank, |_, _| standard.sample(&mut rng) * scale);
    let unit_effects = DVector::from_fn(n, |_, _| standard.sample(&mut rng));
    let time_effects = DVector::from_fn(t, |_, _| standard.sample(&mut rng));

    let x = (config.unit_covariates > 0)
        .then(|| DMatrix::from_fn(n, config.unit_covariates, |_, _| standard.sample(&mut rng)));
    let z = (config.time_covariates > 0)
        .then(|| DMatrix::from_fn(t, config.time_covariates, |_, _| standard.sample(&mut rng)));
    let x_tilde = with_intercept(x.as_ref(), n);
    let z_tilde = with_intercept(z.as_ref(), t);
    let h = DMatrix::from_fn(x_tilde.ncols(), z_tilde.ncols(), |_, _| 0.5 * standard.sample(&mut rng));

    let mut baseline = &u * v.transpose() + &x_tilde * h * z_tilde.transpose();
    for i in 0..n {
        for s in 0..t {
            baseline[(i, s)] += unit_effects[i] + time_effects[s];
        }
    }

    let treated = assign_treatment(&mut rng, n, t, config.treated_fraction, config.adoption);

    let mut outcomes = baseline.clone();
    for i in 0..n {
        for s in 0..t {
            if config.noise > 0.0 {
                outcomes[(i, s)] += noise.sample(&mut rng);
            }
            if treated[(i, s)] {
                outcomes[(i, s)] += config.effect;
            }
        }
    }

    let mut panel = PanelData::new(outcomes, treated);
    if let Some(x) = x {
        panel = panel.with_unit_covariates(x);
    }
    if let Some(z) = z {
        panel = panel.with_time_covariates(z);
    }

    Ok(SimulatedPanel {
        panel,
        true_effect: config.effect,
        baseline,
    })
}

/// Treat randomly ordered units until the treated share reaches `fraction`.
///
/// At least one unit is always left untreated.
fn assign_treatment(rng: &mut StdRng, n: usize, t: usize, fraction: f64, adoption: Adoption) -> DMatrix<bool> {
    let mut treated = DMatrix::from_element(n, t, false);
    let target = (fraction * (n * t) as f64).round() as usize;
    if target == 0 {
        return treated;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut count = 0;
    for &unit in order.iter().take(n - 1) {
        if count >= target {
            break;
        }
        let start = match adoption {
            Adoption::Staggered => rng.gen_range(t / 2..t),
            Adoption::Block => t / 2,
        };
        for s in start..t {
            treated[(unit, s)] = true;
        }
        count += t - start;
    }
    treated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_panel_has_requested_shape() {
        let config = SimulationConfig {
            unit_covariates: 2,
            time_covariates: 1,
            ..SimulationConfig::default()
        };
        let sim = generate_panel(&config).unwrap();
        assert_eq!(sim.panel.outcomes.shape(), (50, 10));
        assert_eq!(sim.panel.n_unit_covariates(), 2);
        assert_eq!(sim.panel.n_time_covariates(), 1);
        assert!(sim.panel.validate().is_ok());
    }

    #[test]
    fn treated_share_is_close_to_target() {
        let sim = generate_panel(&SimulationConfig::default()).unwrap();
        let share = sim.panel.n_treated() as f64 / 500.0;
        assert!(share >= 0.1 && share < 0.1 + 5.0 / 500.0 + 1e-12, "share={share}");
        // Some unit is never treated.
        assert!((0..50).any(|i| (0..10).all(|s| !sim.panel.treated[(i, s)])));
    }

    #[test]
    fn staggered_adoption_is_absorbing() {
        let sim = generate_panel(&SimulationConfig::default()).unwrap();
        for i in 0..50 {
            let row: Vec<bool> = (0..10).map(|s| sim.panel.treated[(i, s)]).collect();
            if let Some(first) = row.iter().position(|&w| w) {
                assert!(first >= 5);
                assert!(row[first..].iter().all(|&w| w));
            }
        }
    }

    #[test]
    fn noiseless_outcomes_are_baseline_plus_effect() {
        let config = SimulationConfig {
            noise: 0.0,
            adoption: Adoption::Block,
            ..SimulationConfig::default()
        };
        let sim = generate_panel(&config).unwrap();
        for i in 0..50 {
            for s in 0..10 {
                let expected = sim.baseline[(i, s)] + if sim.panel.treated[(i, s)] { 5.0 } else { 0.0 };
                assert!((sim.panel.outcomes[(i, s)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn same_seed_same_panel() {
        let a = generate_panel(&SimulationConfig::default()).unwrap();
        let b = generate_panel(&SimulationConfig::default()).unwrap();
        assert_eq!(a.panel.outcomes, b.panel.outcomes);
        assert_eq!(a.panel.treated, b.panel.treated);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad = SimulationConfig {
            rank: 0,
            ..SimulationConfig::default()
        };
        assert!(generate_panel(&bad).is_err());
        let bad = SimulationConfig {
            treated_fraction: 1.0,
            ..SimulationConfig::default()
        };
        assert!(generate_panel(&bad).is_err());
    }
}
