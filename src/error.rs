//! Error type shared by the estimator, the IO layer and the binary.
//!
//! Every variant maps to a process exit code so `main` can stay tiny:
//! input/configuration problems exit with `2`, numerical failures with `4`.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EstimationError {
    /// Dimension mismatch among Y, W, X, Z, V or Ω (or an empty panel).
    #[error("Input shape error: {0}")]
    InputShape(String),

    /// Well-shaped input with invalid contents (non-finite values, non-binary mask, bad Ω).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid estimator settings, or a mask that leaves nothing to fit.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A numerical failure that leaves no usable estimate.
    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl EstimationError {
    pub fn shape(message: impl Into<String>) -> Self {
        Self::InputShape(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InputShape(_) | Self::InvalidInput(_) | Self::Configuration(_) | Self::Io(_) => 2,
            Self::Numerical(_) => 4,
        }
    }
}
