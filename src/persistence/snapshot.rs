//! The on-disk form of the vector store.
//!
//! A snapshot is a generation: a vector blob (`vectors-<gen>.bin`) and the
//! tool metadata (`tools-<gen>.json`, descriptor text and definition per
//! tool). `manifest.json` names the current generation and is the single
//! commit point. A save writes the new generation's files first and only
//! then swaps the manifest, so a concurrent reader sees either the old
//! snapshot or the new one. The previous generation is kept on disk for
//! readers that picked up the old manifest just before the swap.

use crate::error::{AppError, Result};
use crate::ingestion::ToolDefinition;
use crate::persistence::atomic_write;
use crate::persistence::blob::{decode_vectors, encode_vectors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

const VECTORS_PREFIX: &str = "vectors-";
const VECTORS_SUFFIX: &str = ".bin";
const TOOLS_PREFIX: &str = "tools-";
const TOOLS_SUFFIX: &str = ".json";

/// Attempts when the manifest moves to a new generation mid-read.
const LOAD_ATTEMPTS: usize = 3;

/// Snapshot layout version recorded in the manifest.
pub const FORMAT_VERSION: u32 = 2;

/// One embedded tool.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub name: String,
    pub vector: Vec<f32>,
    /// The exact text `vector` was computed from.
    pub descriptor_text: String,
    pub definition: ToolDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub model_id: String,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
    pub record_count: usize,
    pub dimension: usize,
}

/// `manifest.json` as written: the manifest plus the generation it commits.
#[derive(Serialize, Deserialize)]
struct ManifestFile {
    generation: String,
    #[serde(flatten)]
    manifest: Manifest,
}

#[derive(Serialize, Deserialize)]
struct ToolEntry {
    descriptor_text: String,
    definition: ToolDefinition,
}

pub fn vectors_path(dir: &Path, generation: &str) -> PathBuf {
    dir.join(format!("{}{}{}", VECTORS_PREFIX, generation, VECTORS_SUFFIX))
}

pub fn tools_path(dir: &Path, generation: &str) -> PathBuf {
    dir.join(format!("{}{}{}", TOOLS_PREFIX, generation, TOOLS_SUFFIX))
}

/// Generation named by a data file, if `file_name` is one.
fn generation_of(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(VECTORS_PREFIX)
        .and_then(|rest| rest.strip_suffix(VECTORS_SUFFIX))
        .or_else(|| {
            file_name
                .strip_prefix(TOOLS_PREFIX)
                .and_then(|rest| rest.strip_suffix(TOOLS_SUFFIX))
        })
        .filter(|generation| !generation.is_empty())
}

/// All records plus the manifest that describes them.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: BTreeMap<String, EmbeddingRecord>,
    pub manifest: Option<Manifest>,
}

impl Snapshot {
    /// Load the snapshot in `dir`.
    ///
    /// Never fails: a missing snapshot or any unreadable, malformed or
    /// inconsistent file yields an empty snapshot, so the service keeps
    /// working (only slower) after losing its cache.
    pub fn load(dir: &Path) -> Self {
        match Self::try_load(dir) {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    dir = %dir.display(),
                    records = snapshot.records.len(),
                    "Vector store snapshot loaded"
                );
                snapshot
            }
            Ok(None) => {
                tracing::debug!(dir = %dir.display(), "No vector store snapshot found");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Discarding unreadable vector store snapshot"
                );
                metrics::counter!("snapshot_discarded_total").increment(1);
                Self::default()
            }
        }
    }

    /// Strict load. `Ok(None)` when there is no manifest.
    ///
    /// Data files without a manifest are leftovers of an interrupted first
    /// save and are ignored.
    pub fn try_load(dir: &Path) -> Result<Option<Self>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(committed) = read_manifest(dir)? else {
                return Ok(None);
            };
            match Self::load_generation(dir, &committed) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) if attempt < LOAD_ATTEMPTS => {
                    // A writer may have pruned this generation after we read the manifest
                    let moved = read_manifest(dir)?
                        .is_some_and(|current| current.generation != committed.generation);
                    if !moved {
                        return Err(e);
                    }
                    tracing::debug!(
                        generation = %committed.generation,
                        "Snapshot generation replaced during load, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn load_generation(dir: &Path, committed: &ManifestFile) -> Result<Self> {
        let manifest = &committed.manifest;
        if manifest.format_version != FORMAT_VERSION {
            return Err(AppError::StorageError(format!(
                "Snapshot format version {} does not match expected {}",
                manifest.format_version, FORMAT_VERSION
            )));
        }

        let vectors_path = vectors_path(dir, &committed.generation);
        let mut tools: BTreeMap<String, ToolEntry> =
            read_json(&tools_path(dir, &committed.generation))?;

        let bytes = std::fs::read(&vectors_path).map_err(|e| {
            AppError::StorageError(format!("Failed to read {}: {}", vectors_path.display(), e))
        })?;
        let decoded = decode_vectors(&bytes)?;

        if decoded.entries.len() != manifest.record_count || tools.len() != manifest.record_count
        {
            return Err(AppError::StorageError(format!(
                "Record count mismatch: manifest {}, vectors {}, tools {}",
                manifest.record_count,
                decoded.entries.len(),
                tools.len()
            )));
        }
        if manifest.record_count > 0 && decoded.dimension != manifest.dimension {
            return Err(AppError::StorageError(format!(
                "Dimension mismatch: manifest {}, vectors {}",
                manifest.dimension, decoded.dimension
            )));
        }

        let mut records = BTreeMap::new();
        for (name, vector) in decoded.entries {
            let entry = tools.remove(&name).ok_or_else(|| {
                AppError::StorageError(format!("Tool '{}' has a vector but no metadata", name))
            })?;
            if entry.definition.name != name {
                return Err(AppError::StorageError(format!(
                    "Metadata for '{}' describes tool '{}'",
                    name, entry.definition.name
                )));
            }
            let record = EmbeddingRecord {
                name: name.clone(),
                vector,
                descriptor_text: entry.descriptor_text,
                definition: entry.definition,
            };
            if records.insert(name.clone(), record).is_some() {
                return Err(AppError::StorageError(format!(
                    "Tool '{}' appears twice in the vector blob",
                    name
                )));
            }
        }

        Ok(Self {
            records,
            manifest: Some(manifest.clone()),
        })
    }

    /// Write a new generation, commit it through the manifest, then prune
    /// generations older than the one it replaced.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let previous = read_manifest(dir).ok().flatten().map(|m| m.generation);
        let generation = self.write_generation(dir)?;
        self.commit(dir, &generation)?;
        prune_generations(dir, &generation, previous.as_deref());
        Ok(())
    }

    /// Write this snapshot's data files under a fresh generation name.
    /// Nothing reads them until [`Snapshot::commit`] names the generation.
    fn write_generation(&self, dir: &Path) -> Result<String> {
        let manifest = self.manifest.as_ref().ok_or_else(|| {
            AppError::StorageError("Refusing to save a snapshot without a manifest".to_string())
        })?;

        let dims: BTreeSet<usize> = self.records.values().map(|r| r.vector.len()).collect();
        if dims.len() > 1 {
            return Err(AppError::StorageError(format!(
                "Snapshot mixes vector dimensions {:?}",
                dims
            )));
        }

        let blob = encode_vectors(
            manifest.dimension,
            self.records
                .values()
                .map(|r| (r.name.as_str(), r.vector.as_slice())),
        )?;

        let tools: BTreeMap<&str, ToolEntryRef<'_>> = self
            .records
            .values()
            .map(|r| {
                (
                    r.name.as_str(),
                    ToolEntryRef {
                        descriptor_text: &r.descriptor_text,
                        definition: &r.definition,
                    },
                )
            })
            .collect();

        let generation = uuid::Uuid::new_v4().simple().to_string();
        atomic_write(&vectors_path(dir, &generation), &blob)?;
        atomic_write(&tools_path(dir, &generation), &to_json(&tools)?)?;

        tracing::debug!(
            dir = %dir.display(),
            %generation,
            size_bytes = blob.len(),
            "Snapshot generation written"
        );
        Ok(generation)
    }

    fn commit(&self, dir: &Path, generation: &str) -> Result<()> {
        let manifest = self.manifest.as_ref().ok_or_else(|| {
            AppError::StorageError("Refusing to save a snapshot without a manifest".to_string())
        })?;
        let file = ManifestFile {
            generation: generation.to_string(),
            manifest: manifest.clone(),
        };
        atomic_write(&dir.join(MANIFEST_FILE), &to_json(&file)?)?;

        tracing::info!(
            dir = %dir.display(),
            %generation,
            records = manifest.record_count,
            dimension = manifest.dimension,
            "Vector store snapshot saved"
        );
        Ok(())
    }
}

fn read_manifest(dir: &Path) -> Result<Option<ManifestFile>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

/// Remove data files of every generation except `current` and `previous`.
/// Failures are logged; stale files only cost disk space.
fn prune_generations(dir: &Path, current: &str, previous: Option<&str>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to list snapshot directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(generation) = file_name.to_str().and_then(generation_of) else {
            continue;
        };
        if generation == current || Some(generation) == previous {
            continue;
        }
        if let Err(e) = std::fs::remove_file(entry.path()) {
            tracing::warn!(
                path = %entry.path().display(),
                error = %e,
                "Failed to remove old snapshot file"
            );
        }
    }
}

#[derive(Serialize)]
struct ToolEntryRef<'a> {
    descriptor_text: &'a str,
    definition: &'a ToolDefinition,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read(path).map_err(|e| {
        AppError::StorageError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        AppError::StorageError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::StorageError(format!("Failed to serialize snapshot: {}", e)))
}
