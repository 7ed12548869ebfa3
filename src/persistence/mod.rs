//! Persistence layer for the vector store snapshot.
//!
//! Every file is replaced with write-to-temp + fsync + rename, so a reader
//! sees either the old or the new content, never a torn write.

pub mod blob;
pub mod fingerprint;
pub mod snapshot;

pub use fingerprint::{fingerprint, fingerprint_texts};
pub use snapshot::{EmbeddingRecord, Manifest, Snapshot};

use crate::error::{AppError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Atomically replace `path` with `bytes`, creating parent directories.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| {
        AppError::StorageError(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppError::StorageError(format!("Not a file path: {}", path.display()))
        })?;
    let tmp_path = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    let result = write_and_sync(&tmp_path, bytes).and_then(|()| {
        fs::rename(&tmp_path, path).map_err(|e| {
            AppError::StorageError(format!("Failed to replace {}: {}", path.display(), e))
        })
    });

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        AppError::StorageError(format!("Failed to create {}: {}", path.display(), e))
    })?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .map_err(|e| AppError::StorageError(format!("Failed to write {}: {}", path.display(), e)))?;
    let file = writer.into_inner().map_err(|e| {
        AppError::StorageError(format!("Failed to flush {}: {}", path.display(), e))
    })?;
    file.sync_all()
        .map_err(|e| AppError::StorageError(format!("Failed to sync {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_into_missing_parent_fails_cleanly() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        assert!(atomic_write(&blocker.join("file"), b"x").is_err());
        assert_eq!(fs::read(&blocker).unwrap(), b"not a directory");
    }
}
