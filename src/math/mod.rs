//! Mathematical utilities: singular value thresholding and block normal-equation solves.

pub mod ols;
pub mod svt;

pub use ols::*;
pub use svt::*;
