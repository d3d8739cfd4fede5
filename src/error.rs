//! Error types for the anomaly detection pipeline.

use thiserror::Error;

/// Result type alias for detection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for detection operations
///
/// Errors propagate unmodified to the caller. Nothing in the crate retries.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input data (missing time column, too few training rows, feature-set mismatch)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Scoring or attribution requested before the model was trained
    #[error("Model not fitted: {0}")]
    NotFitted(String),

    /// Output table is missing required columns
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) => 2,
            Error::Config(_) => 3,
            Error::NotFitted(_) | Error::Schema(_) => 4,
            Error::Io(_) | Error::Csv(_) | Error::Json(_) => 5,
        }
    }
}
