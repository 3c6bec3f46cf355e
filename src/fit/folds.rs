//! Validation splits over the usable (control) cells.
//!
//! - `cv`: a seeded K-fold partition; split k validates fold k.
//! - `holdout`: fold 0 of the same partition is the only validation set.
//! - `rolling`: forward-chaining windows along the time axis.
//!
//! Treated cells never appear in any split: both training masks and validation
//! cell lists are subsets of the control mask.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::domain::{EstimatorConfig, ValidationMethod};
use crate::error::EstimationError;

/// A `(unit, period)` index.
pub type Cell = (usize, usize);

/// One train/validate split.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSplit {
    /// Cells the solver may fit on.
    pub train: DMatrix<bool>,
    /// Cells scored after fitting.
    pub validate: Vec<Cell>,
}

/// Usable cells in row-major order.
pub fn usable_cells(mask: &DMatrix<bool>) -> Vec<Cell> {
    let (n, t) = mask.shape();
    (0..n)
        .flat_map(|i| (0..t).map(move |s| (i, s)))
        .filter(|&cell| mask[cell])
        .collect()
}

/// Partition `cells` into `k` disjoint, near-equal folds.
///
/// After a seeded shuffle, position `j` goes to fold `j % k`, so fold sizes differ
/// by at most one.
pub fn partition_folds(cells: &[Cell], k: usize, seed: u64) -> Result<Vec<Vec<Cell>>, EstimationError> {
    if k < 2 {
        return Err(EstimationError::config(format!("Fold count must be >= 2, got {k}.")));
    }
    if k > cells.len() {
        return Err(EstimationError::config(format!(
            "Fold count {k} exceeds the number of usable cells ({}).",
            cells.len()
        )));
    }

    let mut shuffled = cells.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let mut folds = vec![Vec::with_capacity(cells.len() / k + 1); k];
    for (j, cell) in shuffled.into_iter().enumerate() {
        folds[j % k].push(cell);
    }
    Ok(folds)
}

/// Build the validation splits requested by `config`.
pub fn build_splits(control: &DMatrix<bool>, config: &EstimatorConfig) -> Result<Vec<ValidationSplit>, EstimationError> {
    match config.validation_method {
        ValidationMethod::Cv => {
            let folds = partition_folds(&usable_cells(control), config.n_folds, config.seed)?;
            Ok(folds.iter().map(|fold| holdout_split(control, fold)).collect())
        }
        ValidationMethod::Holdout => {
            let folds = partition_folds(&usable_cells(control), config.n_folds, config.seed)?;
            Ok(vec![holdout_split(control, &folds[0])])
        }
        ValidationMethod::Rolling => rolling_splits(control, config),
    }
}

fn holdout_split(control: &DMatrix<bool>, fold: &[Cell]) -> ValidationSplit {
    let mut train = control.clone();
    for &cell in fold {
        train[cell] = false;
    }
    ValidationSplit {
        train,
        validate: fold.to_vec(),
    }
}

/// Resolved forward-chaining layout.
///
/// `initial_window`, `step_size` and `horizon` count periods from `window_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingWindows {
    /// First period that takes part (`T - max_window_size`, or 0).
    pub window_start: usize,
    pub initial_window: usize,
    pub step_size: usize,
    pub horizon: usize,
}

impl RollingWindows {
    /// Fill unset fields over the `W = min(max_window_size, T)` trailing periods:
    /// `initial_window = ⌊0.8·W⌋`, `step_size = max(1, (W - initial_window) / K)`,
    /// `horizon = step_size`.
    pub fn resolve(n_periods: usize, config: &EstimatorConfig) -> Result<Self, EstimationError> {
        let span = match config.max_window_size {
            Some(0) => {
                return Err(EstimationError::config("Rolling max_window_size must be >= 1."));
            }
            Some(m) => m.min(n_periods),
            None => n_periods,
        };
        if span < 5 {
            return Err(EstimationError::config(format!(
                "Rolling validation needs at least 5 periods, got {span}."
            )));
        }
        if config.n_folds == 0 {
            return Err(EstimationError::config("Rolling validation needs at least one split."));
        }
        let initial_window = config.initial_window.unwrap_or(span * 4 / 5);
        if initial_window == 0 || initial_window >= span {
            return Err(EstimationError::config(format!(
                "Rolling initial_window must be in 1..{span}, got {initial_window}."
            )));
        }
        let step_size = config
            .step_size
            .unwrap_or(((span - initial_window) / config.n_folds).max(1));
        let horizon = config.horizon.unwrap_or(step_size);
        if step_size == 0 || horizon == 0 {
            return Err(EstimationError::config("Rolling step_size and horizon must be >= 1."));
        }
        Ok(Self {
            window_start: n_periods - span,
            initial_window,
            step_size,
            horizon,
        })
    }
}

fn rolling_splits(control: &DMatrix<bool>, config: &EstimatorConfig) -> Result<Vec<ValidationSplit>, EstimationError> {
    let (n, t) = control.shape();
    let windows = RollingWindows::resolve(t, config)?;
    let first = windows.window_start;

    let mut splits = Vec::new();
    for k in 0..config.n_folds {
        let train_end = first + windows.initial_window + k * windows.step_size;
        if train_end >= t {
            break;
        }
        let test_end = (train_end + windows.horizon).min(t);

        let train = DMatrix::from_fn(n, t, |i, s| control[(i, s)] && (first..train_end).contains(&s));
        let validate: Vec<Cell> = (0..n)
            .flat_map(|i| (train_end..test_end).map(move |s| (i, s)))
            .filter(|&cell| control[cell])
            .collect();

        if validate.is_empty() || !train.iter().any(|&m| m) {
            log::debug!("rolling split {k} skipped (train_end={train_end}): empty train or validation set");
            continue;
        }
        splits.push(ValidationSplit { train, validate });
    }

    if splits.is_empty() {
        return Err(EstimationError::config(
            "Rolling validation produced no split with both training and validation cells.",
        ));
    }
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(n: usize, t: usize) -> DMatrix<bool> {
        // Unit 0 is treated from period t-2 on.
        DMatrix::from_fn(n, t, |i, s| !(i == 0 && s + 2 >= t))
    }

    #[test]
    fn folds_cover_every_cell_exactly_once() {
        let cells = usable_cells(&mask(6, 5));
        assert_eq!(cells.len(), 28);
        let folds = partition_folds(&cells, 4, 11).unwrap();
        assert_eq!(folds.len(), 4);

        let mut all: Vec<Cell> = folds.iter().flatten().copied().collect();
        all.sort();
        assert_eq!(all, cells);

        let sizes: Vec<usize> = folds.iter().map(|f| f.len()).collect();
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn folds_are_reproducible_for_a_seed() {
        let cells = usable_cells(&mask(6, 5));
        assert_eq!(partition_folds(&cells, 3, 7).unwrap(), partition_folds(&cells, 3, 7).unwrap());
        assert_ne!(partition_folds(&cells, 3, 7).unwrap(), partition_folds(&cells, 3, 8).unwrap());
    }

    #[test]
    fn fold_count_outside_range_is_a_configuration_error() {
        let cells = usable_cells(&mask(2, 3));
        assert_eq!(cells.len(), 4);
        assert!(matches!(partition_folds(&cells, 1, 0), Err(EstimationError::Configuration(_))));
        assert!(matches!(partition_folds(&cells, 5, 0), Err(EstimationError::Configuration(_))));
        assert!(partition_folds(&cells, 4, 0).is_ok());
    }

    #[test]
    fn cv_splits_never_touch_treated_cells() {
        let control = mask(5, 6);
        let config = EstimatorConfig {
            n_folds: 3,
            ..EstimatorConfig::default()
        };
        let splits = build_splits(&control, &config).unwrap();
        assert_eq!(splits.len(), 3);
        for split in &splits {
            assert!(split.validate.iter().all(|&c| control[c] && !split.train[c]));
            assert!(split.train.iter().zip(control.iter()).all(|(&tr, &c)| !tr || c));
        }
    }

    #[test]
    fn holdout_uses_a_single_fold() {
        let control = mask(5, 6);
        let config = EstimatorConfig {
            validation_method: ValidationMethod::Holdout,
            n_folds: 4,
            ..EstimatorConfig::default()
        };
        let splits = build_splits(&control, &config).unwrap();
        assert_eq!(splits.len(), 1);
        let expected = partition_folds(&usable_cells(&control), 4, config.seed).unwrap();
        assert_eq!(splits[0].validate, expected[0]);
    }

    #[test]
    fn rolling_splits_chain_forward_in_time() {
        let control = mask(3, 10);
        let config = EstimatorConfig {
            validation_method: ValidationMethod::Rolling,
            n_folds: 2,
            ..EstimatorConfig::default()
        };
        // initial_window = 8, step = max(1, 2 / 2) = 1, horizon = 1.
        let windows = RollingWindows::resolve(10, &config).unwrap();
        assert_eq!(
            windows,
            RollingWindows {
                window_start: 0,
                initial_window: 8,
                step_size: 1,
                horizon: 1
            }
        );

        let splits = build_splits(&control, &config).unwrap();
        assert_eq!(splits.len(), 2);
        // Unit 0 is treated at periods 8 and 9, so only units 1 and 2 validate.
        assert_eq!(splits[0].validate, vec![(1, 8), (2, 8)]);
        assert_eq!(splits[1].validate, vec![(1, 9), (2, 9)]);
        assert!(!splits[0].train[(1, 8)]);
        assert!(splits[1].train[(1, 8)]);
    }

    #[test]
    fn rolling_needs_five_periods() {
        let config = EstimatorConfig {
            validation_method: ValidationMethod::Rolling,
            ..EstimatorConfig::default()
        };
        assert!(matches!(build_splits(&mask(3, 4), &config), Err(EstimationError::Configuration(_))));
    }

    #[test]
    fn rolling_respects_max_window() {
        let control = mask(3, 12);
        let config = EstimatorConfig {
            validation_method: ValidationMethod::Rolling,
            n_folds: 2,
            max_window_size: Some(6),
            ..EstimatorConfig::default()
        };
        // Periods 6..12 take part: initial_window = 4, step = 1, horizon = 1.
        let windows = RollingWindows::resolve(12, &config).unwrap();
        assert_eq!(windows.window_start, 6);
        assert_eq!(windows.initial_window, 4);

        let splits = build_splits(&control, &config).unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].validate, vec![(1, 10), (2, 10)]);
        assert_eq!(splits[1].validate, vec![(1, 11), (2, 11)]);
        for split in &splits {
            assert!((0..3).all(|i| (0..6).all(|s| !split.train[(i, s)])));
            assert!(split.validate.iter().all(|&(_, s)| s >= 6));
        }
        assert!(splits[0].train[(1, 6)] && !splits[0].train[(1, 10)]);

        let too_short = EstimatorConfig {
            max_window_size: Some(4),
            ..config.clone()
        };
        assert!(matches!(build_splits(&control, &too_short), Err(EstimationError::Configuration(_))));
        let zero = EstimatorConfig {
            max_window_size: Some(0),
            ..config
        };
        assert!(matches!(RollingWindows::resolve(12, &zero), Err(EstimationError::Configuration(_))));
    }
}
