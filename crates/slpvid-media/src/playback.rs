//! Playback Dolphin launcher.
//!
//! Playback Dolphin renders a replay headlessly and dumps the frames and
//! audio into the working directory. It is driven entirely through files:
//! a user directory with patched config, and an `input.json` queue naming
//! the replay and the frame range.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use slpvid_models::{ProgressWindow, RunConfig, Stage, FIRST_FRAME};

use crate::error::MediaResult;
use crate::metadata::ReplayMetadataReader;
use crate::process::{
    ExternalProcess, OutputScraper, OutputSink, OutputStream, ProcessEvents, ProcessHandle,
    ScrapeAction, SpawnOptions, StageLauncher,
};
use crate::user_config::{set_ini_value, Template};

/// Audio dump written by playback Dolphin.
pub const AUDIO_DUMP_FILE: &str = "dspdump.wav";
/// Video dump written by playback Dolphin.
pub const VIDEO_DUMP_FILE: &str = "framedump0.avi";
/// Replay queue descriptor.
pub const INPUT_JSON_FILE: &str = "input.json";

const USER_DIR: &str = "User";
const NO_GAME_MARKER: &str = "[NO_GAME]";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueEntry<'a> {
    path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_frame: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_frame: Option<i32>,
}

#[derive(Debug, Serialize)]
struct PlaybackInput<'a> {
    mode: &'static str,
    queue: Vec<QueueEntry<'a>>,
}

/// Launcher for the playback stage.
#[derive(Clone)]
pub struct PlaybackLauncher {
    dolphin_path: PathBuf,
    input_file: PathBuf,
    work_dir: PathBuf,
    melee_iso: PathBuf,
    start_frame: Option<i32>,
    end_frame: Option<i32>,
    bitrate: u32,
    efb_scale: u32,
    enable_widescreen: bool,
    timeout: Option<Duration>,
    asset_dir: Option<PathBuf>,
    output_sink: Option<OutputSink>,
    progress_start: i64,
    progress_end: Option<i64>,
}

impl PlaybackLauncher {
    /// Create a launcher for `config`, starting at the padded start frame.
    ///
    /// When no end frame is configured, the replay's recorded last frame is
    /// used as the progress end; failing to read it only loses the
    /// percentage.
    pub fn from_config(
        dolphin_path: impl Into<PathBuf>,
        config: &RunConfig,
        metadata: &dyn ReplayMetadataReader,
    ) -> Self {
        let start_frame = config.padded_start().map(|p| p.start_frame);

        let progress_end = match config.end_frame {
            Some(end) => Some(i64::from(end) + 1),
            None => match metadata.last_frame(&config.input_file) {
                Ok(last) => last.map(i64::from),
                Err(e) => {
                    warn!(
                        input = %config.input_file.display(),
                        "Could not read replay metadata: {}", e
                    );
                    None
                }
            },
        };

        Self {
            dolphin_path: dolphin_path.into(),
            input_file: config.input_file.clone(),
            work_dir: config.work_dir.clone(),
            melee_iso: config.melee_iso.clone(),
            start_frame,
            end_frame: config.end_frame,
            bitrate: config.bitrate,
            efb_scale: config.internal_resolution.efb_scale(),
            enable_widescreen: config.enable_widescreen,
            timeout: config.dolphin_timeout,
            asset_dir: config.asset_dir.clone(),
            output_sink: None,
            progress_start: i64::from(start_frame.unwrap_or(FIRST_FRAME)),
            progress_end,
        }
    }

    /// Mirror raw process output to `sink`.
    pub fn with_output_sink(mut self, sink: Option<OutputSink>) -> Self {
        self.output_sink = sink;
        self
    }

    /// Frame the playback binary is told to start at.
    pub fn start_frame(&self) -> Option<i32> {
        self.start_frame
    }

    /// `(start, end)` of the playback progress window.
    pub fn progress_bounds(&self) -> (i64, Option<i64>) {
        (self.progress_start, self.progress_end)
    }

    pub fn user_dir(&self) -> PathBuf {
        self.work_dir.join(USER_DIR)
    }

    pub fn input_json_path(&self) -> PathBuf {
        self.work_dir.join(INPUT_JSON_FILE)
    }

    pub fn audio_dump_path(&self) -> PathBuf {
        self.work_dir.join(AUDIO_DUMP_FILE)
    }

    pub fn video_dump_path(&self) -> PathBuf {
        self.work_dir.join(VIDEO_DUMP_FILE)
    }

    /// Write the user directory and replay queue into the working directory.
    pub fn prepare_work_dir(&self) -> MediaResult<()> {
        let config_dir = self.user_dir().join("Config");
        std::fs::create_dir_all(&config_dir)?;

        let dolphin_ini = Template::Dolphin.load(self.asset_dir.as_deref())?;
        std::fs::write(config_dir.join(Template::Dolphin.file_name()), dolphin_ini.as_bytes())?;

        let gfx_ini = Template::Gfx.load(self.asset_dir.as_deref())?;
        let gfx_ini = set_ini_value(&gfx_ini, "Settings", "BitrateKbps", &self.bitrate.to_string());
        let gfx_ini = set_ini_value(&gfx_ini, "Settings", "EFBScale", &self.efb_scale.to_string());
        std::fs::write(config_dir.join(Template::Gfx.file_name()), gfx_ini)?;

        if self.enable_widescreen {
            let game_settings_dir = self.user_dir().join("GameSettings");
            std::fs::create_dir_all(&game_settings_dir)?;
            let gecko = Template::Widescreen.load(self.asset_dir.as_deref())?;
            std::fs::write(
                game_settings_dir.join(Template::Widescreen.file_name()),
                gecko.as_bytes(),
            )?;
        }

        let input = PlaybackInput {
            mode: "queue",
            queue: vec![QueueEntry {
                path: &self.input_file,
                start_frame: self.start_frame,
                end_frame: self.end_frame,
            }],
        };
        std::fs::write(self.input_json_path(), serde_json::to_vec(&input)?)?;

        debug!(
            work_dir = %self.work_dir.display(),
            efb_scale = self.efb_scale,
            bitrate = self.bitrate,
            widescreen = self.enable_widescreen,
            "Prepared playback working directory"
        );
        Ok(())
    }

    /// Playback Dolphin arguments.
    pub fn build_args(&self) -> Vec<String> {
        vec![
            "-u".to_string(),
            self.user_dir().to_string_lossy().to_string(),
            "--output-directory".to_string(),
            self.work_dir.to_string_lossy().to_string(),
            "-i".to_string(),
            self.input_json_path().to_string_lossy().to_string(),
            "-e".to_string(),
            self.melee_iso.to_string_lossy().to_string(),
            "-b".to_string(),
            "--cout".to_string(),
            "--hide-seekbar".to_string(),
        ]
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.dolphin_path);
        command.args(self.build_args()).current_dir(&self.work_dir);
        command
    }
}

impl StageLauncher for PlaybackLauncher {
    fn stage(&self) -> Stage {
        Stage::Playback
    }

    fn launch(&self, events: Arc<ProcessEvents>) -> MediaResult<Arc<dyn ExternalProcess>> {
        self.prepare_work_dir()?;

        info!(
            replay = %self.input_file.display(),
            start_frame = ?self.start_frame,
            end_frame = ?self.end_frame,
            "Starting playback"
        );
        debug!("Running playback: {} {}", self.dolphin_path.display(), self.build_args().join(" "));

        let scraper = PlaybackScraper::new(self.progress_start, self.progress_end);
        let handle = ProcessHandle::spawn(
            Stage::Playback,
            self.command(),
            scraper,
            events,
            SpawnOptions {
                timeout: self.timeout,
                output_sink: self.output_sink.clone(),
            },
        )?;
        Ok(Arc::new(handle))
    }
}

fn current_frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[CURRENT_FRAME\]\s+(-?\d+)").expect("valid regex"))
}

/// Turns playback Dolphin output into frame progress.
#[derive(Debug, Clone)]
pub struct PlaybackScraper {
    start: i64,
    end: Option<i64>,
}

impl PlaybackScraper {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }
}

impl OutputScraper for PlaybackScraper {
    fn scrape(&mut self, stream: OutputStream, line: &str) -> Option<ScrapeAction> {
        if stream != OutputStream::Stdout {
            return None;
        }

        // Dolphin idles on an empty queue once the replay is done
        if line.starts_with(NO_GAME_MARKER) {
            return Some(ScrapeAction::Terminate);
        }

        let caps = current_frame_regex().captures(line)?;
        let frame: i64 = caps[1].parse().ok()?;
        Some(ScrapeAction::Progress(ProgressWindow::new(self.start, frame, self.end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use slpvid_models::{InternalResolution, RunOptions};
    use tempfile::TempDir;

    struct FixedLastFrame(MediaResult<Option<i32>>);

    impl ReplayMetadataReader for FixedLastFrame {
        fn last_frame(&self, _path: &Path) -> MediaResult<Option<i32>> {
            match &self.0 {
                Ok(frame) => Ok(*frame),
                Err(_) => Err(MediaError::invalid_replay("broken")),
            }
        }
    }

    fn config(work_dir: &Path, options: RunOptions) -> RunConfig {
        RunConfig::from_options(RunOptions {
            input_file: Some(PathBuf::from("/replays/game.slp")),
            work_dir: Some(work_dir.to_path_buf()),
            melee_iso: Some(PathBuf::from("/isos/SSBM.iso")),
            ..options
        })
        .unwrap()
    }

    #[test]
    fn test_progress_end_from_metadata() {
        let dir = TempDir::new().unwrap();
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(dir.path(), RunOptions::default()),
            &FixedLastFrame(Ok(Some(600))),
        );
        assert_eq!(launcher.progress_bounds(), (i64::from(FIRST_FRAME), Some(600)));
        assert_eq!(launcher.start_frame(), None);
    }

    #[test]
    fn test_progress_end_from_end_frame() {
        let dir = TempDir::new().unwrap();
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(
                dir.path(),
                RunOptions {
                    start_frame: Some(200),
                    end_frame: Some(1000),
                    ..Default::default()
                },
            ),
            &FixedLastFrame(Ok(Some(600))),
        );
        assert_eq!(launcher.start_frame(), Some(80));
        assert_eq!(launcher.progress_bounds(), (80, Some(1001)));
    }

    #[test]
    fn test_unreadable_metadata_leaves_end_unknown() {
        let dir = TempDir::new().unwrap();
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(dir.path(), RunOptions::default()),
            &FixedLastFrame(Err(MediaError::invalid_replay("broken"))),
        );
        assert_eq!(launcher.progress_bounds().1, None);
    }

    #[test]
    fn test_prepare_work_dir() {
        let dir = TempDir::new().unwrap();
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(
                dir.path(),
                RunOptions {
                    start_frame: Some(200),
                    end_frame: Some(1000),
                    bitrate: Some(8000),
                    internal_resolution: Some(InternalResolution::Uhd4K),
                    ..Default::default()
                },
            ),
            &FixedLastFrame(Ok(None)),
        );
        launcher.prepare_work_dir().unwrap();

        let gfx = std::fs::read_to_string(dir.path().join("User/Config/GFX.ini")).unwrap();
        assert!(gfx.contains("BitrateKbps = 8000"));
        assert!(gfx.contains("EFBScale = 9"));
        assert!(!gfx.contains("BitrateKbps = 25000"));

        assert!(dir.path().join("User/Config/Dolphin.ini").is_file());
        assert!(!dir.path().join("User/GameSettings/GALE01.ini").exists());

        let input: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("input.json")).unwrap()).unwrap();
        assert_eq!(
            input,
            serde_json::json!({
                "mode": "queue",
                "queue": [{"path": "/replays/game.slp", "startFrame": 80, "endFrame": 1000}]
            })
        );
    }

    #[test]
    fn test_unknown_resolution_uses_default_scale() {
        let dir = TempDir::new().unwrap();
        let options: RunOptions =
            serde_json::from_str(r#"{"internal_resolution": "9000p", "bitrate": 9000}"#).unwrap();
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(dir.path(), options),
            &FixedLastFrame(Ok(None)),
        );
        launcher.prepare_work_dir().unwrap();

        let gfx = std::fs::read_to_string(dir.path().join("User/Config/GFX.ini")).unwrap();
        assert!(gfx.contains("EFBScale = 4"));
        assert!(gfx.contains("BitrateKbps = 9000"));
    }

    #[test]
    fn test_prepare_work_dir_widescreen_and_open_range() {
        let dir = TempDir::new().unwrap();
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(
                dir.path(),
                RunOptions {
                    enable_widescreen: Some(true),
                    ..Default::default()
                },
            ),
            &FixedLastFrame(Ok(None)),
        );
        launcher.prepare_work_dir().unwrap();

        let gecko =
            std::fs::read_to_string(dir.path().join("User/GameSettings/GALE01.ini")).unwrap();
        assert!(gecko.contains("Widescreen"));

        let input: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("input.json")).unwrap()).unwrap();
        assert_eq!(input["queue"][0], serde_json::json!({"path": "/replays/game.slp"}));
    }

    #[test]
    fn test_build_args() {
        let launcher = PlaybackLauncher::from_config(
            "dolphin",
            &config(Path::new("/work"), RunOptions::default()),
            &FixedLastFrame(Ok(None)),
        );
        assert_eq!(
            launcher.build_args(),
            vec![
                "-u",
                "/work/User",
                "--output-directory",
                "/work",
                "-i",
                "/work/input.json",
                "-e",
                "/isos/SSBM.iso",
                "-b",
                "--cout",
                "--hide-seekbar",
            ]
        );
        assert_eq!(launcher.video_dump_path(), PathBuf::from("/work/framedump0.avi"));
        assert_eq!(launcher.audio_dump_path(), PathBuf::from("/work/dspdump.wav"));
    }

    #[test]
    fn test_scraper() {
        let mut scraper = PlaybackScraper::new(-123, Some(600));

        assert_eq!(
            scraper.scrape(OutputStream::Stdout, "[CURRENT_FRAME] 177"),
            Some(ScrapeAction::Progress(ProgressWindow::new(-123, 177, Some(600))))
        );
        assert_eq!(
            scraper.scrape(OutputStream::Stdout, "[CURRENT_FRAME]\t-100"),
            Some(ScrapeAction::Progress(ProgressWindow::new(-123, -100, Some(600))))
        );
        assert_eq!(
            scraper.scrape(OutputStream::Stdout, "[NO_GAME] waiting for replay"),
            Some(ScrapeAction::Terminate)
        );
        assert_eq!(scraper.scrape(OutputStream::Stdout, "[GAME_END]"), None);
        assert_eq!(scraper.scrape(OutputStream::Stderr, "[CURRENT_FRAME] 5"), None);
    }
}
