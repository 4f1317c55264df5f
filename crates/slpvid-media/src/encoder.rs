//! FFmpeg launcher that muxes the playback dumps into the output file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use slpvid_models::Stage;

use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::process::{
    ExternalProcess, OutputSink, ProcessEvents, ProcessHandle, SpawnOptions, StageLauncher,
};
use crate::progress::EncoderScraper;

/// Launcher for the encoder stage.
#[derive(Clone)]
pub struct EncoderLauncher {
    ffmpeg_path: PathBuf,
    video_file: PathBuf,
    audio_file: PathBuf,
    output_file: PathBuf,
    volume: f64,
    start_cutoff_secs: f64,
    timeout: Option<Duration>,
    output_sink: Option<OutputSink>,
}

impl EncoderLauncher {
    pub fn new(
        ffmpeg_path: impl Into<PathBuf>,
        video_file: impl Into<PathBuf>,
        audio_file: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            video_file: video_file.into(),
            audio_file: audio_file.into(),
            output_file: output_file.into(),
            volume: 1.0,
            start_cutoff_secs: 0.0,
            timeout: None,
            output_sink: None,
        }
    }

    /// Audio volume multiplier; `1.0` leaves audio untouched.
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Seconds of pre-roll to trim from the start of the output.
    pub fn with_start_cutoff(mut self, seconds: f64) -> Self {
        self.start_cutoff_secs = seconds.max(0.0);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_sink(mut self, sink: Option<OutputSink>) -> Self {
        self.output_sink = sink;
        self
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Whether the video track can be copied without re-encoding.
    pub fn copies_video(&self) -> bool {
        fn extension(path: &Path) -> Option<String> {
            path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
        }
        let output = extension(&self.output_file);
        output.is_some() && output == extension(&self.video_file)
    }

    pub fn build_command(&self) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&self.output_file)
            .input(&self.video_file)
            .input(&self.audio_file);

        if self.copies_video() {
            cmd = cmd.video_codec("copy");
        }

        if self.volume != 1.0 {
            cmd = cmd.volume(self.volume);
        }

        if self.start_cutoff_secs > 0.0 {
            cmd = cmd.seek(self.start_cutoff_secs);
        }

        cmd
    }
}

impl StageLauncher for EncoderLauncher {
    fn stage(&self) -> Stage {
        Stage::Encoder
    }

    fn launch(&self, events: Arc<ProcessEvents>) -> MediaResult<Arc<dyn ExternalProcess>> {
        let cmd = self.build_command();

        info!(
            output = %self.output_file.display(),
            copy_video = self.copies_video(),
            cutoff_secs = self.start_cutoff_secs,
            "Starting encoder"
        );
        debug!("Running FFmpeg: {} {}", self.ffmpeg_path.display(), cmd.build_args().join(" "));

        let handle = ProcessHandle::spawn(
            Stage::Encoder,
            cmd.into_command(&self.ffmpeg_path),
            EncoderScraper::new(self.start_cutoff_secs),
            events,
            SpawnOptions {
                timeout: self.timeout,
                output_sink: self.output_sink.clone(),
            },
        )?;
        Ok(Arc::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(output: &str) -> EncoderLauncher {
        EncoderLauncher::new("ffmpeg", "/w/framedump0.avi", "/w/dspdump.wav", output)
    }

    #[test]
    fn test_avi_output_copies_video() {
        let args = launcher("out.AVI").with_volume(0.25).build_command().build_args();
        assert_eq!(
            args,
            vec![
                "-y",
                "-v",
                "info",
                "-progress",
                "pipe:1",
                "-i",
                "/w/framedump0.avi",
                "-i",
                "/w/dspdump.wav",
                "-c:v",
                "copy",
                "-af",
                "volume=0.25",
                "out.AVI",
            ]
        );
    }

    #[test]
    fn test_other_container_reencodes() {
        let args = launcher("out.mp4").build_command().build_args();
        assert!(!args.contains(&"copy".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_unit_volume_has_no_filter() {
        let args = launcher("out.avi").with_volume(1.0).build_command().build_args();
        assert!(!args.contains(&"-af".to_string()));
    }

    #[test]
    fn test_cutoff_adds_trim() {
        let args = launcher("out.avi").with_start_cutoff(2.0).build_command().build_args();
        assert!(args.windows(2).any(|w| w == ["-ss", "2.000"]));

        let args = launcher("out.avi").with_start_cutoff(0.0).build_command().build_args();
        assert!(!args.contains(&"-ss".to_string()));

        let args = launcher("out.avi").with_start_cutoff(-1.0).build_command().build_args();
        assert!(!args.contains(&"-ss".to_string()));
    }

    #[test]
    fn test_missing_extension_never_copies() {
        assert!(!launcher("output").copies_video());
    }
}
