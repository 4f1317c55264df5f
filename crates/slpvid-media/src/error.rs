//! Error types for media operations.
//!
//! Only pre-flight problems are errors. Once a pipeline is running, stage
//! failures are reported as exit codes through the "done" event.

use std::path::PathBuf;
use thiserror::Error;

use slpvid_models::ModelError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while preparing or starting a conversion.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No valid playback Dolphin path was found")]
    PlaybackNotFound,

    #[error("No valid FFmpeg path was found")]
    FfmpegNotFound,

    #[error("File not found or not readable: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline has already been started")]
    AlreadyStarted,

    #[error("Invalid replay file: {0}")]
    InvalidReplay(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl MediaError {
    /// Create a spawn failure error.
    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            source,
        }
    }

    /// Create an invalid replay error.
    pub fn invalid_replay(message: impl Into<String>) -> Self {
        Self::InvalidReplay(message.into())
    }
}
