//! PID and status files of the resident server.

use crate::error::{AppError, Result};
use crate::persistence::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PID_FILE: &str = "embed_server.pid";
pub const STATUS_FILE: &str = "status.json";
pub const LOG_FILE: &str = "server.log";

/// Contents of `status.json`. Advisory only: always confirm with a live probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub running: bool,
    pub pid: u32,
    pub port: u16,
    pub start_time: DateTime<Utc>,
    pub tool_count: usize,
}

#[derive(Debug, Clone)]
pub struct RuntimeFiles {
    dir: PathBuf,
}

impl RuntimeFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// True if either file is present, even if stale.
    pub fn any_exist(&self) -> bool {
        self.pid_path().exists() || self.status_path().exists()
    }

    /// Record the current process as the running server.
    pub fn write(&self, record: &StatusRecord) -> Result<()> {
        atomic_write(&self.pid_path(), record.pid.to_string().as_bytes())?;
        self.write_status(record)
    }

    pub fn write_status(&self, record: &StatusRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| AppError::StorageError(format!("Failed to serialize status: {}", e)))?;
        atomic_write(&self.status_path(), &json)
    }

    /// Update only `tool_count`. A missing or unreadable status file is left alone.
    pub fn set_tool_count(&self, tool_count: usize) -> Result<()> {
        match self.read_status() {
            Some(mut record) => {
                record.tool_count = tool_count;
                self.write_status(&record)
            }
            None => Ok(()),
        }
    }

    pub fn read_pid(&self) -> Option<u32> {
        let raw = fs::read_to_string(self.pid_path()).ok()?;
        match raw.trim().parse() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(path = %self.pid_path().display(), error = %e, "Ignoring malformed PID file");
                None
            }
        }
    }

    pub fn read_status(&self) -> Option<StatusRecord> {
        let raw = fs::read(self.status_path()).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %self.status_path().display(), error = %e, "Ignoring malformed status file");
                None
            }
        }
    }

    /// Delete both files. Missing files are not an error.
    pub fn clear(&self) -> Result<()> {
        for path in [self.pid_path(), self.status_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::StorageError(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record() -> StatusRecord {
        StatusRecord {
            running: true,
            pid: 4242,
            port: 8765,
            start_time: Utc::now(),
            tool_count: 3,
        }
    }

    #[test]
    fn test_write_read_clear() {
        let dir = tempdir().unwrap();
        let files = RuntimeFiles::new(dir.path().join("embedding_server"));
        assert!(!files.any_exist());

        files.write(&record()).unwrap();
        assert_eq!(files.read_pid(), Some(4242));
        assert_eq!(files.read_status().unwrap().tool_count, 3);

        files.clear().unwrap();
        assert!(!files.any_exist());
        files.clear().unwrap();
    }

    #[test]
    fn test_set_tool_count() {
        let dir = tempdir().unwrap();
        let files = RuntimeFiles::new(dir.path());

        files.set_tool_count(9).unwrap();
        assert!(files.read_status().is_none());

        files.write(&record()).unwrap();
        files.set_tool_count(9).unwrap();
        assert_eq!(files.read_status().unwrap().tool_count, 9);
    }

    #[test]
    fn test_malformed_files_read_as_absent() {
        let dir = tempdir().unwrap();
        let files = RuntimeFiles::new(dir.path());
        fs::write(files.pid_path(), "not a pid").unwrap();
        fs::write(files.status_path(), "{").unwrap();

        assert!(files.any_exist());
        assert!(files.read_pid().is_none());
        assert!(files.read_status().is_none());
    }
}
