//! Error types for the rlx core library

use thiserror::Error;

/// Core error type for training operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Invalid configuration, raised before anything is built
    #[error("Configuration error: {0}")]
    Config(String),

    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Invalid state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Dimension mismatch
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being checked
        context: &'static str,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// A loss or gradient stopped being finite
    #[error("Non-finite value in {0}")]
    NonFinite(String),

    /// Lookup of an unregistered name
    #[error("Unknown {kind}: {name}")]
    UnknownVariant {
        /// Registry kind (environment, algorithm)
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RLError {
    /// Build a dimension mismatch error
    #[must_use]
    pub fn dim(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            actual,
        }
    }
}

/// Result type alias for rlx operations
pub type Result<T> = std::result::Result<T, RLError>;

/// Fail with [`RLError::DimensionMismatch`] unless `actual == expected`
pub fn ensure_dim(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RLError::dim(context, expected, actual))
    }
}
