//! Pid registry: the daemon's pid persisted as `{"pid": N}`.
//!
//! The file is a hint, not a lock. A missing or corrupt file means
//! "no known daemon" and is never an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: i64,
}

#[derive(Debug, Clone)]
pub struct PidRegistry {
    path: PathBuf,
}

impl PidRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `pid`, replacing whatever was there.
    pub fn save(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string(&PidRecord { pid: pid as i64 })?;
        fs::write(&self.path, json)?;
        debug!(pid, path = %self.path.display(), "pid file written");
        Ok(())
    }

    /// Read the recorded pid. Missing, unreadable, malformed and
    /// non-positive values all yield `None`.
    pub fn load(&self) -> Option<u32> {
        let bytes = fs::read(&self.path).ok()?;
        let record: PidRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed pid file");
                return None;
            }
        };
        // pid 0 and negatives address process groups under kill(2)
        if record.pid <= 0 {
            return None;
        }
        u32::try_from(record.pid).ok()
    }

    /// Delete the pid file. Already absent is fine.
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "pid file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove pid file"),
        }
    }

    /// Delete the pid file only if it still names `pid`.
    pub fn remove_if_owned(&self, pid: u32) {
        if self.load() == Some(pid) {
            self.remove();
        }
    }
}
