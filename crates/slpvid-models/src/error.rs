//! Error types for model parsing and validation.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while parsing user input or validating a run configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Timestamp cannot be empty")]
    EmptyTimestamp,

    #[error("Timestamp cannot be negative")]
    NegativeTimestamp,

    #[error("Invalid {0} value: {1}")]
    InvalidTimestampValue(&'static str, String),

    #[error("Invalid timestamp format '{0}'. Use HH:MM:SS, MM:SS or SS (optionally with .mmm)")]
    InvalidTimestampFormat(String),

    #[error("Invalid frame input '{0}': expected a frame number or a timestamp")]
    InvalidFrameInput(String),

    #[error("Unknown internal resolution: {0}")]
    UnknownResolution(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ModelError {
    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
