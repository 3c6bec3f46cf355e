//! Reporting utilities: per-period effects and formatted terminal output.

pub mod format;

pub use format::*;

use crate::domain::{EstimationResult, PanelData};

/// Average treated effect within one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodEffect {
    pub period: usize,
    pub treated_cells: usize,
    pub effect: f64,
}

/// Mean of `Y - Ŷ` over the treated cells of each period that has any.
pub fn period_effects(panel: &PanelData, result: &EstimationResult) -> Vec<PeriodEffect> {
    let effects = result.cell_effects(panel);
    effects
        .column_iter()
        .enumerate()
        .filter_map(|(t, column)| {
            let (sum, count) = column
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, c), e| (s + e, c + 1));
            (count > 0).then(|| PeriodEffect {
                period: t,
                treated_cells: count,
                effect: sum / count as f64,
            })
        })
        .collect()
}
