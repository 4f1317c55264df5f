//! Per-run working directory.

use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};
use tracing::{debug, info};

use crate::error::MediaResult;

const WORK_DIR_PREFIX: &str = "slp-to-video-";

/// Unique scratch directory holding the playback user dir and dump files.
///
/// In development mode the directory lives under `<base>/tmp` and is kept
/// after the run for inspection.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
    keep: bool,
}

impl WorkDir {
    /// Create a fresh directory in the system temp dir.
    pub fn create() -> MediaResult<Self> {
        let dir = Builder::new().prefix(WORK_DIR_PREFIX).tempdir()?;
        debug!(path = %dir.path().display(), "Created working directory");
        Ok(Self { dir, keep: false })
    }

    /// Create a kept directory under `<base>/tmp`.
    pub fn create_for_development(base: &Path) -> MediaResult<Self> {
        let parent = base.join("tmp");
        std::fs::create_dir_all(&parent)?;

        let dir = Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .keep(true)
            .tempdir_in(&parent)?;
        info!(path = %dir.path().display(), "Created development working directory");
        Ok(Self { dir, keep: true })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Remove the directory and everything in it, unless it is kept.
    pub fn cleanup(self) -> MediaResult<()> {
        if self.keep {
            info!(path = %self.dir.path().display(), "Keeping working directory");
            return Ok(());
        }

        let path = self.to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Removed working directory");
        Ok(())
    }
}
