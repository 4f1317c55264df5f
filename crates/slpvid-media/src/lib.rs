#![deny(unreachable_patterns)]
//! Replay rendering through playback Dolphin and FFmpeg.
//!
//! This crate provides:
//! - Supervised child processes with output scraping, kill, and timeouts
//! - Playback Dolphin launcher (user dir templates, replay queue, frame progress)
//! - FFmpeg command building and progress parsing from `-progress pipe:1`
//! - The playback → encode pipeline with a single terminal outcome
//! - Binary discovery, per-run working directories, replay metadata

pub mod command;
pub mod encoder;
pub mod error;
pub mod events;
pub mod locate;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod playback;
pub mod process;
pub mod progress;
pub mod user_config;
pub mod workdir;

pub use command::FfmpegCommand;
pub use encoder::EncoderLauncher;
pub use error::{MediaError, MediaResult};
pub use locate::{BinaryLocator, DefaultLocator, FixedLocator, HostEnvironment, Platform};
pub use metadata::{ReplayMetadataReader, SlpMetadataReader};
pub use pipeline::{ConversionPipeline, PipelineOptions};
pub use playback::{PlaybackLauncher, PlaybackScraper, AUDIO_DUMP_FILE, VIDEO_DUMP_FILE};
pub use process::{
    ExternalProcess, KillSignal, OutputScraper, OutputSink, OutputStream, ProcessEvents,
    ProcessHandle, ScrapeAction, SpawnOptions, StageLauncher,
};
pub use progress::{EncoderProgress, EncoderScraper};
pub use workdir::WorkDir;
