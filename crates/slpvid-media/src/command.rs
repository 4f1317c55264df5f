//! FFmpeg command builder.

use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Machine-readable progress goes to stdout.
const PROGRESS_TARGET: &str = "pipe:1";

/// Builder for FFmpeg commands.
///
/// Always overwrites the output, logs at `info` (input durations are read
/// from stderr) and reports progress on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file paths, in `-i` order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Add an input file.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Trim the first `seconds` of the output.
    pub fn seek(self, seconds: f64) -> Self {
        self.output_arg("-ss").output_arg(format!("{:.3}", seconds))
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Scale audio volume.
    pub fn volume(self, multiplier: f64) -> Self {
        self.audio_filter(format!("volume={}", multiplier))
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-v", "info", "-progress", PROGRESS_TARGET]
            .into_iter()
            .map(String::from)
            .collect();

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Turn into a process command for the given FFmpeg binary.
    pub fn into_command(self, program: impl AsRef<Path>) -> Command {
        let mut command = Command::new(program.as_ref());
        command.args(self.build_args());
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("framedump0.avi")
            .input("dspdump.wav")
            .volume(0.25)
            .seek(2.0);

        let args = cmd.build_args();
        assert_eq!(
            args,
            vec![
                "-y",
                "-v",
                "info",
                "-progress",
                "pipe:1",
                "-i",
                "framedump0.avi",
                "-i",
                "dspdump.wav",
                "-af",
                "volume=0.25",
                "-ss",
                "2.000",
                "out.mp4",
            ]
        );
    }

    #[test]
    fn test_output_path_is_last() {
        let cmd = FfmpegCommand::new("result.avi")
            .input("a.avi")
            .video_codec("copy");

        let args = cmd.build_args();
        assert_eq!(args.last().map(String::as_str), Some("result.avi"));
        assert!(args.windows(2).any(|w| w == ["-c:v", "copy"]));
    }
}
