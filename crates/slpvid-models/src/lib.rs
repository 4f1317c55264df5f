//! Shared data models for slp-to-video.
//!
//! This crate provides Serde-serializable types for:
//! - Replay frame arithmetic and frame/timestamp input parsing
//! - Internal resolution presets
//! - Run configuration with default overlay and validation
//! - Stage progress windows
//! - Pipeline states and terminal outcomes

pub mod error;
pub mod frames;
pub mod progress;
pub mod resolution;
pub mod run;
pub mod state;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use frames::{
    ms_to_timestamp, pad_start_frame, parse_frame_input, parse_timestamp, PaddedStart,
    DEFAULT_START_PADDING_FRAMES, FIRST_FRAME, FRAMES_PER_SECOND,
};
pub use progress::ProgressWindow;
pub use resolution::{efb_scale_for, InternalResolution, DEFAULT_EFB_SCALE};
pub use run::{RunConfig, RunId, RunOptions};
pub use state::{ExitCode, PipelineState, Stage, Termination, SUCCESS_EXIT_CODE};
