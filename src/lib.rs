//! `mcnnm` library crate.
//!
//! Matrix completion with nuclear-norm minimization (MC-NNM) for panel data:
//! treated cells are masked out, the untreated outcome surface is completed
//! from control cells, and the treatment effect is read off the gap.
//!
//! The binary (`mcnnm`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the estimator is usable directly (`fit::estimate`)

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
