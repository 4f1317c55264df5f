//! Playback Dolphin and FFmpeg binary discovery.
//!
//! The host environment (env overrides, platform, well-known directories)
//! is collected once by [`HostEnvironment::detect`] and passed to the
//! locator explicitly, so lookups are deterministic under test.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::debug;

/// Environment variable overriding the playback Dolphin path.
pub const DOLPHIN_PATH_ENV: &str = "SLP_TO_VIDEO_DOLPHIN_PATH";
/// Environment variable overriding the FFmpeg path.
pub const FFMPEG_PATH_ENV: &str = "SLP_TO_VIDEO_FFMPEG_PATH";

/// Directory the Slippi Launcher keeps its data in, under the config dir.
const LAUNCHER_DIR: &str = "Slippi Launcher";
const PLAYBACK_DIR: &str = "playback";

/// Host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }

    /// Playback Dolphin path relative to a playback install directory.
    pub fn playback_binary_name(&self) -> &'static str {
        match self {
            Platform::Windows => "Slippi Dolphin.exe",
            Platform::MacOs => "Slippi Dolphin.app/Contents/MacOS/Slippi Dolphin",
            Platform::Linux => "Slippi_Playback-x86_64.AppImage",
        }
    }

    pub fn ffmpeg_binary_name(&self) -> &'static str {
        match self {
            Platform::Windows => "ffmpeg.exe",
            _ => "ffmpeg",
        }
    }
}

/// Everything binary discovery reads from the host, captured once.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    pub development: bool,
    pub platform: Platform,
    pub dolphin_override: Option<PathBuf>,
    pub ffmpeg_override: Option<PathBuf>,
    /// Per-user config directory (e.g. `~/.config`, `%APPDATA%`)
    pub config_dir: Option<PathBuf>,
    /// Directory of the running executable
    pub bundle_dir: Option<PathBuf>,
    /// Directory searched first in development mode
    pub dev_dir: Option<PathBuf>,
    /// `PATH` used for the last-resort lookup
    pub search_path: Option<OsString>,
}

impl HostEnvironment {
    /// Read the host environment.
    pub fn detect(development: bool) -> Self {
        let non_empty = |name: &str| {
            std::env::var_os(name)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        Self {
            development,
            platform: Platform::current(),
            dolphin_override: non_empty(DOLPHIN_PATH_ENV),
            ffmpeg_override: non_empty(FFMPEG_PATH_ENV),
            config_dir: BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()),
            bundle_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            dev_dir: std::env::current_dir().ok(),
            search_path: std::env::var_os("PATH"),
        }
    }

    /// An environment that finds nothing; fields are filled in by the caller.
    pub fn empty(platform: Platform) -> Self {
        Self {
            development: false,
            platform,
            dolphin_override: None,
            ffmpeg_override: None,
            config_dir: None,
            bundle_dir: None,
            dev_dir: None,
            search_path: None,
        }
    }
}

/// Resolves the two external binaries.
pub trait BinaryLocator: Send + Sync {
    fn playback_binary(&self) -> Option<PathBuf>;
    fn encoder_binary(&self) -> Option<PathBuf>;
}

/// Locator searching the conventional install locations.
#[derive(Debug, Clone)]
pub struct DefaultLocator {
    env: HostEnvironment,
}

impl DefaultLocator {
    pub fn new(env: HostEnvironment) -> Self {
        Self { env }
    }

    /// Playback Dolphin candidates, in search order.
    pub fn playback_candidates(&self) -> Vec<PathBuf> {
        let name = self.env.platform.playback_binary_name();
        let mut candidates = Vec::new();

        if let Some(path) = &self.env.dolphin_override {
            candidates.push(path.clone());
        }
        if self.env.development {
            if let Some(dir) = &self.env.dev_dir {
                candidates.push(dir.join("bin").join(PLAYBACK_DIR).join(name));
            }
        }
        if let Some(dir) = &self.env.bundle_dir {
            candidates.push(dir.join(PLAYBACK_DIR).join(name));
        }
        if let Some(dir) = &self.env.config_dir {
            candidates.push(dir.join(LAUNCHER_DIR).join(PLAYBACK_DIR).join(name));
        }

        candidates
    }

    /// FFmpeg candidates, in search order, before the `PATH` lookup.
    pub fn encoder_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(path) = &self.env.ffmpeg_override {
            candidates.push(path.clone());
        }
        if let Some(dir) = &self.env.bundle_dir {
            candidates.push(dir.join(self.env.platform.ffmpeg_binary_name()));
        }

        candidates
    }

    fn search_path(&self, names: &[&str]) -> Option<PathBuf> {
        let search_path = self.env.search_path.as_ref()?;
        let cwd = self.env.dev_dir.clone().unwrap_or_default();
        names
            .iter()
            .find_map(|name| which::which_in(name, Some(search_path), &cwd).ok())
    }
}

fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| {
        let found = path.is_file();
        debug!(path = %path.display(), found, "Checked binary candidate");
        found
    })
}

impl BinaryLocator for DefaultLocator {
    fn playback_binary(&self) -> Option<PathBuf> {
        first_existing(self.playback_candidates()).or_else(|| {
            self.search_path(&[self.env.platform.playback_binary_name(), "slippi-playback"])
        })
    }

    fn encoder_binary(&self) -> Option<PathBuf> {
        first_existing(self.encoder_candidates()).or_else(|| self.search_path(&["ffmpeg"]))
    }
}

/// Locator returning fixed paths.
#[derive(Debug, Clone, Default)]
pub struct FixedLocator {
    pub playback: Option<PathBuf>,
    pub encoder: Option<PathBuf>,
}

impl BinaryLocator for FixedLocator {
    fn playback_binary(&self) -> Option<PathBuf> {
        self.playback.clone()
    }

    fn encoder_binary(&self) -> Option<PathBuf> {
        self.encoder.clone()
    }
}
