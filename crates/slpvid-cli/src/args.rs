//! Command line arguments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use slpvid_models::run::{
    DEFAULT_BITRATE_KBPS, DEFAULT_MELEE_ISO, DEFAULT_OUTPUT_FILE, DEFAULT_VOLUME,
};
use slpvid_models::{parse_frame_input, InternalResolution, RunOptions};

/// Converts SLP files to video files.
#[derive(Parser, Debug)]
#[command(name = "slp-to-video")]
pub struct Args {
    /// Replay file to convert
    pub slp_file: PathBuf,

    /// Path to the Melee ISO
    #[arg(short = 'i', long, default_value = DEFAULT_MELEE_ISO)]
    pub iso: PathBuf,

    /// Overall timeout in milliseconds
    #[arg(short = 'm', long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Output video file
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output: PathBuf,

    /// Show raw Dolphin and FFmpeg output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Enable the widescreen gecko code
    #[arg(short = 'w', long)]
    pub widescreen: bool,

    /// Start frame, or a timestamp such as 1:30
    #[arg(short = 'f', long, allow_hyphen_values = true, value_parser = frame_value)]
    pub from: Option<i32>,

    /// End frame, or a timestamp such as 2:05.5
    #[arg(short = 't', long, allow_hyphen_values = true, value_parser = frame_value)]
    pub to: Option<i32>,

    /// Output volume multiplier
    #[arg(short = 'V', long, default_value_t = DEFAULT_VOLUME)]
    pub volume: f64,

    /// Frame dump bitrate in kbps
    #[arg(short = 'b', long, default_value_t = DEFAULT_BITRATE_KBPS)]
    pub bitrate: u32,

    /// Playback Dolphin binary to use instead of searching for one
    #[arg(short = 'd', long)]
    pub dolphin_path: Option<PathBuf>,

    /// FFmpeg binary to use instead of searching for one
    #[arg(short = 'p', long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Dolphin timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub dolphin_timeout: Option<u64>,

    /// FFmpeg timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub ffmpeg_timeout: Option<u64>,

    /// Internal rendering resolution (auto, 1x, 1.5x, 2x, 720p, 2.5x, 3x,
    /// 1080p, 4x, WQHD, 5x, 6x, 4K, 7x, 8x)
    #[arg(short = 'I', long, default_value_t = InternalResolution::default().to_string())]
    pub internal_resolution: String,

    /// Keep the working directory under ./tmp and prefer local binaries
    #[arg(long, hide = true)]
    pub dev: bool,
}

fn frame_value(input: &str) -> Result<i32, String> {
    parse_frame_input(input).map_err(|e| e.to_string())
}

impl Args {
    /// The requested preset, or the default one for an unknown name.
    pub fn resolution(&self) -> InternalResolution {
        self.internal_resolution.parse().unwrap_or_else(|_| {
            let fallback = InternalResolution::default();
            warn!(
                "Unknown internal resolution {:?}, using {} (valid: {})",
                self.internal_resolution,
                fallback,
                InternalResolution::names()
            );
            fallback
        })
    }

    /// Build run options with every path resolved against `cwd`.
    pub fn to_run_options(&self, cwd: &Path) -> RunOptions {
        RunOptions {
            input_file: Some(cwd.join(&self.slp_file)),
            melee_iso: Some(cwd.join(&self.iso)),
            output_file: Some(cwd.join(&self.output)),
            dolphin_path: self.dolphin_path.as_ref().map(|p| cwd.join(p)),
            ffmpeg_path: self.ffmpeg_path.as_ref().map(|p| cwd.join(p)),
            start_frame: self.from,
            end_frame: self.to,
            volume: Some(self.volume),
            bitrate: Some(self.bitrate),
            internal_resolution: Some(self.resolution()),
            enable_widescreen: Some(self.widescreen),
            timeout: self.timeout.map(Duration::from_millis),
            dolphin_timeout: self.dolphin_timeout.map(Duration::from_millis),
            ffmpeg_timeout: self.ffmpeg_timeout.map(Duration::from_millis),
            ..Default::default()
        }
    }
}
