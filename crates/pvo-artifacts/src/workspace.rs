use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::ArtifactError;

const PREFIX: &str = "pvo_flash_";
const FIRMWARE_FILE: &str = "firmware.bin";

/// Scratch directory owned by one flash attempt.
///
/// Dropping it deletes the directory and everything in it, whichever way
/// the attempt ends.
#[derive(Debug)]
pub struct ArtifactWorkspace {
    dir: TempDir,
}

impl ArtifactWorkspace {
    /// Create under `root`, or the system temp dir when `None`.
    pub fn create(root: Option<&Path>) -> Result<Self, ArtifactError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "artifact workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_firmware(&self, bytes: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self.dir.path().join(FIRMWARE_FILE);
        fs::write(&path, bytes)?;
        debug!(bytes = bytes.len(), path = %path.display(), "firmware stored");
        Ok(path)
    }

    /// Delete now, logging a failure. Dropping does the same silently.
    pub fn purge(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "artifact workspace cleanup failed");
        } else {
            debug!(path = %path.display(), "artifact workspace purged");
        }
    }
}
