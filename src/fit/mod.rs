//! MC-NNM fitting.
//!
//! Responsibilities:
//!
//! - solve the penalized problem for one `(λ_L, λ_H)` (block coordinate descent)
//! - build validation splits and `λ` grids
//! - select `(λ_L, λ_H)` on held-out control cells (parallel)
//! - refit, complete the matrix and average the treated effects

pub mod estimate;
pub mod folds;
pub mod lambda_grid;
pub mod selection;
pub mod solver;

pub use estimate::*;
pub use folds::*;
pub use lambda_grid::*;
pub use selection::*;
pub use solver::*;
