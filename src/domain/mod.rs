//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - panel inputs (`PanelData`) and their validation
//! - estimator settings (`EstimatorConfig`, `ValidationMethod`, `SearchMode`, `InitStrategy`)
//! - fit outputs (`EstimationResult`, `FitComponents`, `SolverReport`, warnings)

pub mod types;

pub use types::*;
