//! Input/output helpers.
//!
//! - CSV matrix ingest + panel loading (`ingest`)
//! - completed-matrix CSV export (`export`)
//! - result JSON read/write (`result`)

pub mod export;
pub mod ingest;
pub mod result;

pub use export::*;
pub use ingest::*;
pub use result::*;
