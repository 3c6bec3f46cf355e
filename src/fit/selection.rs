//! Hyperparameter selection for `(λ_L, λ_H)`.
//!
//! Every grid point is scored by the mean held-out MSE across validation splits.
//!
//! Selection rules:
//! 1. Ignore non-finite scores
//! 2. Choose the minimum mean score
//! 3. Break exact ties by larger `λ_L`, then larger `λ_H` (the simpler model)
//! 4. If nothing is finite, fall back to the grid midpoint and record a warning
//!
//! Each `(split, λ_H)` pair is an independent path solved in parallel; within a
//! path `λ_L` is walked from large to small with warm starts.

use rayon::prelude::*;

use crate::domain::{
    EstimatorConfig, FitComponents, GridScore, Lambdas, NumericalWarning, SearchMode, SearchSummary, Termination,
};
use crate::fit::folds::ValidationSplit;
use crate::fit::lambda_grid::middle_index;
use crate::fit::solver::{Solver, SolverOptions};
use crate::models::{mse_over_cells, Design};

/// Output of the search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub lambdas: Lambdas,
    pub summary: SearchSummary,
    pub warnings: Vec<NumericalWarning>,
}

/// Mean validation scores indexed `[λ_L index][λ_H index]`.
#[derive(Debug, Clone)]
struct ScoreTable {
    scores: Vec<Vec<f64>>,
    tally: FitTally,
}

/// Counts of validation fits that ended badly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FitTally {
    capped: usize,
    svd_failed: usize,
    total: usize,
}

impl FitTally {
    fn add(&mut self, other: FitTally) {
        self.capped += other.capped;
        self.svd_failed += other.svd_failed;
        self.total += other.total;
    }

    fn warnings(&self) -> Vec<NumericalWarning> {
        let mut out = Vec::new();
        if self.capped > 0 {
            out.push(NumericalWarning::ValidationNotConverged {
                fits: self.capped,
                total: self.total,
            });
        }
        if self.svd_failed > 0 {
            out.push(NumericalWarning::ValidationSvdFailure {
                fits: self.svd_failed,
                total: self.total,
            });
        }
        out
    }
}

/// Score the grids on `splits` and pick `(λ_L, λ_H)`.
///
/// `lambda_l_grid` should be in decreasing order so warm starts move from the
/// sparser solution to the denser one.
pub fn select_lambdas(
    design: &Design<'_>,
    splits: &[ValidationSplit],
    lambda_l_grid: &[f64],
    lambda_h_grid: &[f64],
    config: &EstimatorConfig,
) -> SearchOutcome {
    let opts = SolverOptions::validation(config);
    let mut warnings = Vec::new();
    let mut scored = Vec::new();
    let mut tally = FitTally::default();

    log::info!(
        "search: {:?}/{:?} over {} x {} grid, {} split(s)",
        config.validation_method,
        config.search_mode,
        lambda_l_grid.len(),
        lambda_h_grid.len(),
        splits.len()
    );

    let selected = match config.search_mode {
        SearchMode::Joint => {
            let table = score_grid(design, splits, lambda_l_grid, lambda_h_grid, opts);
            tally.add(table.tally);
            record_scores(&table, lambda_l_grid, lambda_h_grid, &mut scored);
            choose(&table, lambda_l_grid, lambda_h_grid, &mut warnings)
        }
        SearchMode::Staged => {
            let default_h = [lambda_h_grid[middle_index(lambda_h_grid.len())]];
            let stage_l = score_grid(design, splits, lambda_l_grid, &default_h, opts);
            tally.add(stage_l.tally);
            record_scores(&stage_l, lambda_l_grid, &default_h, &mut scored);
            let chosen_l = choose(&stage_l, lambda_l_grid, &default_h, &mut warnings).lambda_l;

            if lambda_h_grid.len() > 1 {
                let fixed_l = [chosen_l];
                let stage_h = score_grid(design, splits, &fixed_l, lambda_h_grid, opts);
                tally.add(stage_h.tally);
                record_scores(&stage_h, &fixed_l, lambda_h_grid, &mut scored);
                choose(&stage_h, &fixed_l, lambda_h_grid, &mut warnings)
            } else {
                Lambdas::new(chosen_l, lambda_h_grid[0])
            }
        }
    };

    for warning in tally.warnings() {
        log::warn!("{warning}");
        warnings.push(warning);
    }
    log::info!(
        "search: selected lambda_L={:.4e}, lambda_H={:.4e}",
        selected.lambda_l,
        selected.lambda_h
    );

    SearchOutcome {
        lambdas: selected,
        summary: SearchSummary {
            method: config.validation_method,
            mode: config.search_mode,
            n_splits: splits.len(),
            lambda_l_grid: lambda_l_grid.to_vec(),
            lambda_h_grid: lambda_h_grid.to_vec(),
            scores: scored,
            selected,
        },
        warnings,
    }
}

fn score_grid(
    design: &Design<'_>,
    splits: &[ValidationSplit],
    lambda_l_grid: &[f64],
    lambda_h_grid: &[f64],
    opts: SolverOptions,
) -> ScoreTable {
    let paths: Vec<(usize, usize)> = (0..splits.len())
        .flat_map(|s| (0..lambda_h_grid.len()).map(move |h| (s, h)))
        .collect();

    // Evaluate each (split, λ_H) path independently (parallel).
    let path_scores: Vec<(usize, Vec<f64>, FitTally)> = paths
        .par_iter()
        .map(|&(s, h)| {
            let split = &splits[s];
            let solver = Solver::new(design, &split.train, lambda_h_grid[h], opts);
            let mut warm: Option<FitComponents> = None;
            let mut tally = FitTally::default();
            let scores = lambda_l_grid
                .iter()
                .map(|&lambda_l| {
                    let out = solver.solve(lambda_l, warm.as_ref());
                    tally.total += 1;
                    if out.report.termination == Termination::MaxIterReached {
                        tally.capped += 1;
                    }
                    if out
                        .warnings
                        .iter()
                        .any(|w| matches!(w, NumericalWarning::SvdFailure { .. }))
                    {
                        log::debug!("validation fit at lambda_L={lambda_l:.4e} kept L after an SVD failure");
                        tally.svd_failed += 1;
                    }
                    let mse = mse_over_cells(design, &out.components, &split.validate);
                    warm = out.components.is_finite().then_some(out.components);
                    mse
                })
                .collect();
            (h, scores, tally)
        })
        .collect();

    let n_splits = splits.len() as f64;
    let mut scores = vec![vec![0.0; lambda_h_grid.len()]; lambda_l_grid.len()];
    let mut tally = FitTally::default();
    for (h, path, path_tally) in &path_scores {
        tally.add(*path_tally);
        for (l, mse) in path.iter().enumerate() {
            scores[l][*h] += mse / n_splits;
        }
    }
    for (l, row) in scores.iter().enumerate() {
        for (h, score) in row.iter().enumerate() {
            log::debug!(
                "grid lambda_L={:.4e} lambda_H={:.4e}: mean mse={score:.6e}",
                lambda_l_grid[l],
                lambda_h_grid[h]
            );
        }
    }

    ScoreTable { scores, tally }
}

fn record_scores(table: &ScoreTable, lambda_l_grid: &[f64], lambda_h_grid: &[f64], out: &mut Vec<GridScore>) {
    for (l, row) in table.scores.iter().enumerate() {
        for (h, &score) in row.iter().enumerate() {
            out.push(GridScore {
                lambdas: Lambdas::new(lambda_l_grid[l], lambda_h_grid[h]),
                score,
            });
        }
    }
}

/// Minimum finite score; ties go to larger `λ_L`, then larger `λ_H`.
fn best_index(table: &ScoreTable, lambda_l_grid: &[f64], lambda_h_grid: &[f64]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for (l, row) in table.scores.iter().enumerate() {
        for (h, &score) in row.iter().enumerate() {
            if !score.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((bl, bh, bs)) => {
                    score < bs
                        || (score == bs
                            && (lambda_l_grid[l], lambda_h_grid[h]) > (lambda_l_grid[bl], lambda_h_grid[bh]))
                }
            };
            if better {
                best = Some((l, h, score));
            }
        }
    }
    best.map(|(l, h, _)| (l, h))
}

fn choose(
    table: &ScoreTable,
    lambda_l_grid: &[f64],
    lambda_h_grid: &[f64],
    warnings: &mut Vec<NumericalWarning>,
) -> Lambdas {
    match best_index(table, lambda_l_grid, lambda_h_grid) {
        Some((l, h)) => Lambdas::new(lambda_l_grid[l], lambda_h_grid[h]),
        None => {
            let fallback = Lambdas::new(
                lambda_l_grid[middle_index(lambda_l_grid.len())],
                lambda_h_grid[middle_index(lambda_h_grid.len())],
            );
            let warning = NumericalWarning::NoFiniteScores { fallback };
            log::warn!("{warning}");
            warnings.push(warning);
            fallback
        }
    }
}
