//! Run configuration for one replay conversion.
//!
//! Callers describe a run with a sparse [`RunOptions`]; unset fields take the
//! defaults of [`RunConfig::default`]. An explicit value always wins over the
//! default, including falsy values such as `0` padding frames.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::frames::{pad_start_frame, PaddedStart, DEFAULT_START_PADDING_FRAMES};
use crate::resolution::InternalResolution;

/// Default ISO path, relative to the working directory of the caller.
pub const DEFAULT_MELEE_ISO: &str = "SSBM.iso";
/// Default output file name.
pub const DEFAULT_OUTPUT_FILE: &str = "output.avi";
/// Default output volume multiplier.
pub const DEFAULT_VOLUME: f64 = 0.25;
/// Default bitrate (kbps) for dumped frames.
pub const DEFAULT_BITRATE_KBPS: u32 = 25_000;

/// Identifier attached to every log line of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable configuration of one playback → encode pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunConfig {
    /// Replay (.slp) to render
    pub input_file: PathBuf,
    /// Pre-created, writable working directory
    pub work_dir: PathBuf,
    /// Game image passed to the playback binary
    pub melee_iso: PathBuf,
    /// Playback binary; resolved by the binary locator when unset
    pub dolphin_path: Option<PathBuf>,
    /// Encoder binary; resolved by the binary locator when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Final output file
    pub output_file: PathBuf,
    /// First replay frame wanted in the output
    pub start_frame: Option<i32>,
    /// Last replay frame wanted in the output
    pub end_frame: Option<i32>,
    /// Pre-roll rendered before `start_frame` and trimmed by the encoder
    pub start_padding_frames: u32,
    /// Output volume multiplier
    pub volume: f64,
    /// Dump bitrate in kbps
    pub bitrate: u32,
    pub internal_resolution: InternalResolution,
    pub enable_widescreen: bool,
    /// Wall-clock limit for the whole pipeline
    pub timeout: Option<Duration>,
    /// Hard limit for the playback process alone
    pub dolphin_timeout: Option<Duration>,
    /// Hard limit for the encoder process alone
    pub ffmpeg_timeout: Option<Duration>,
    /// Directory whose config templates override the embedded ones
    pub asset_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("input.slp"),
            work_dir: PathBuf::from("tmp"),
            melee_iso: PathBuf::from(DEFAULT_MELEE_ISO),
            dolphin_path: None,
            ffmpeg_path: None,
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            start_frame: None,
            end_frame: None,
            start_padding_frames: DEFAULT_START_PADDING_FRAMES,
            volume: DEFAULT_VOLUME,
            bitrate: DEFAULT_BITRATE_KBPS,
            internal_resolution: InternalResolution::default(),
            enable_widescreen: false,
            timeout: None,
            dolphin_timeout: None,
            ffmpeg_timeout: None,
            asset_dir: None,
        }
    }
}

/// Sparse run description; `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RunOptions {
    pub input_file: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub melee_iso: Option<PathBuf>,
    pub dolphin_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub start_frame: Option<i32>,
    pub end_frame: Option<i32>,
    pub start_padding_frames: Option<u32>,
    pub volume: Option<f64>,
    pub bitrate: Option<u32>,
    pub internal_resolution: Option<InternalResolution>,
    pub enable_widescreen: Option<bool>,
    pub timeout: Option<Duration>,
    pub dolphin_timeout: Option<Duration>,
    pub ffmpeg_timeout: Option<Duration>,
    pub asset_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Overlay `options` onto the defaults and validate the result.
    pub fn from_options(options: RunOptions) -> ModelResult<Self> {
        let defaults = Self::default();

        let config = Self {
            input_file: options.input_file.unwrap_or(defaults.input_file),
            work_dir: options.work_dir.unwrap_or(defaults.work_dir),
            melee_iso: options.melee_iso.unwrap_or(defaults.melee_iso),
            dolphin_path: options.dolphin_path.or(defaults.dolphin_path),
            ffmpeg_path: options.ffmpeg_path.or(defaults.ffmpeg_path),
            output_file: options.output_file.unwrap_or(defaults.output_file),
            start_frame: options.start_frame.or(defaults.start_frame),
            end_frame: options.end_frame.or(defaults.end_frame),
            start_padding_frames: options
                .start_padding_frames
                .unwrap_or(defaults.start_padding_frames),
            volume: options.volume.unwrap_or(defaults.volume),
            bitrate: options.bitrate.unwrap_or(defaults.bitrate),
            internal_resolution: options
                .internal_resolution
                .unwrap_or(defaults.internal_resolution),
            enable_widescreen: options.enable_widescreen.unwrap_or(defaults.enable_widescreen),
            timeout: options.timeout.or(defaults.timeout),
            dolphin_timeout: options.dolphin_timeout.or(defaults.dolphin_timeout),
            ffmpeg_timeout: options.ffmpeg_timeout.or(defaults.ffmpeg_timeout),
            asset_dir: options.asset_dir.or(defaults.asset_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate field values and their combinations.
    pub fn validate(&self) -> ModelResult<()> {
        let required = [
            ("input_file", &self.input_file),
            ("work_dir", &self.work_dir),
            ("melee_iso", &self.melee_iso),
            ("output_file", &self.output_file),
        ];
        for (name, path) in required {
            if path.as_os_str().is_empty() {
                return Err(ModelError::invalid_config(format!("{} must not be empty", name)));
            }
        }

        if !self.volume.is_finite() || self.volume <= 0.0 {
            return Err(ModelError::invalid_config(format!(
                "volume must be a positive number, got {}",
                self.volume
            )));
        }

        if self.bitrate == 0 {
            return Err(ModelError::invalid_config("bitrate must be greater than zero"));
        }

        if let (Some(start), Some(end)) = (self.start_frame, self.end_frame) {
            if end < start {
                return Err(ModelError::invalid_config(format!(
                    "end frame {} is before start frame {}",
                    end, start
                )));
            }
        }

        Ok(())
    }

    /// Playback start frame and encoder cutoff, when a start frame was requested.
    pub fn padded_start(&self) -> Option<PaddedStart> {
        self.start_frame
            .map(|start| pad_start_frame(start, self.start_padding_frames))
    }
}
