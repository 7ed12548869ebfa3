//! In-memory vector store with change-aware updates.
//!
//! The store maps tool name to [`EmbeddingRecord`] and mirrors itself to the
//! snapshot files in its directory. [`VectorStore::plan`] is the change
//! detector: it decides which tools need new vectors before the embedding
//! backend is touched, so an unchanged tool set never loads the model.

use crate::error::{AppError, Result};
use crate::inference::LazyBackend;
use crate::ingestion::{descriptor_text, ToolDefinition};
use crate::persistence::snapshot::FORMAT_VERSION;
use crate::persistence::{fingerprint_texts, EmbeddingRecord, Manifest, Snapshot};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A tool that needs a fresh vector.
#[derive(Debug, Clone)]
pub struct PendingTool {
    pub definition: ToolDefinition,
    pub descriptor_text: String,
}

/// What an update would do, computed without the backend.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    /// Fingerprint of the (deduplicated) incoming tool set.
    pub fingerprint: String,
    /// Tools to (re-)embed, in name order.
    pub dirty: Vec<PendingTool>,
    /// Tools whose descriptor text is unchanged but whose raw definition differs.
    pub refreshed: Vec<ToolDefinition>,
    /// Stored tools absent from the incoming set.
    pub removed: Vec<String>,
    /// The stored vectors came from another model.
    pub model_changed: bool,
}

impl UpdatePlan {
    /// True when neither vectors nor membership change.
    pub fn is_noop(&self) -> bool {
        self.dirty.is_empty() && self.removed.is_empty()
    }
}

/// Result of [`VectorStore::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Vectors were added, replaced or removed.
    pub changed: bool,
    pub fingerprint: String,
    pub embedded: usize,
    pub removed: usize,
    pub refreshed: usize,
    /// Tools that could not be embedded. Each keeps its previous record if it had one.
    pub failed: Vec<String>,
    /// Records in the store after the update.
    pub tool_count: usize,
    /// False when the snapshot could not be written; the in-memory store is still current.
    pub persisted: bool,
}

pub struct VectorStore {
    dir: PathBuf,
    snapshot: Snapshot,
}

impl VectorStore {
    /// Load the snapshot in `dir`. An unusable snapshot yields an empty store.
    pub fn load(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            snapshot: Snapshot::load(dir),
        }
    }

    /// An empty store that will persist into `dir`.
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            snapshot: Snapshot::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.snapshot.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&EmbeddingRecord> {
        self.snapshot.records.get(name)
    }

    /// Records in name order.
    pub fn records(&self) -> impl Iterator<Item = &EmbeddingRecord> {
        self.snapshot.records.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot.records.keys().cloned().collect()
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.snapshot.manifest.as_ref()
    }

    /// Vector dimension, or `None` for an empty store.
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot.records.values().next().map(|r| r.vector.len())
    }

    /// Decide what an update with `tools` under `model_id` has to do.
    ///
    /// Duplicate names: the last definition wins.
    pub fn plan(&self, tools: &[ToolDefinition], model_id: &str, force: bool) -> UpdatePlan {
        let mut incoming: BTreeMap<&str, &ToolDefinition> = BTreeMap::new();
        for tool in tools {
            if incoming.insert(tool.name.as_str(), tool).is_some() {
                tracing::warn!(tool = %tool.name, "Duplicate tool name, keeping the last definition");
            }
        }

        let texts: BTreeMap<&str, String> = incoming
            .iter()
            .map(|(name, tool)| (*name, descriptor_text(tool)))
            .collect();
        let fingerprint = fingerprint_texts(texts.values().map(String::as_str));

        let model_changed = self
            .manifest()
            .is_some_and(|m| m.model_id != model_id);

        let mut plan = UpdatePlan {
            fingerprint,
            model_changed,
            ..UpdatePlan::default()
        };

        for (name, tool) in &incoming {
            let text = &texts[name];
            match self.get(name) {
                Some(record) if !force && !model_changed && record.descriptor_text == *text => {
                    if record.definition != **tool {
                        plan.refreshed.push((*tool).clone());
                    }
                }
                _ => plan.dirty.push(PendingTool {
                    definition: (*tool).clone(),
                    descriptor_text: text.clone(),
                }),
            }
        }

        plan.removed = self
            .snapshot
            .records
            .keys()
            .filter(|name| !incoming.contains_key(name.as_str()))
            .cloned()
            .collect();

        plan
    }

    /// Bring the store in line with `tools`, embedding only what changed.
    ///
    /// The backend is loaded only when at least one tool is dirty. If it
    /// cannot be loaded, or no dirty tool can be embedded, the store is left
    /// untouched and `AppError::ModelError` is returned.
    pub fn update(
        &mut self,
        tools: &[ToolDefinition],
        backend: &mut LazyBackend,
        force: bool,
    ) -> Result<UpdateOutcome> {
        let start = Instant::now();
        let model_id = backend.model_id().to_string();
        let plan = self.plan(tools, &model_id, force);

        if plan.is_noop() {
            let refreshed = plan.refreshed.len();
            let mut persisted = true;
            if refreshed > 0 {
                for definition in plan.refreshed {
                    if let Some(record) = self.snapshot.records.get_mut(&definition.name) {
                        record.definition = definition;
                    }
                }
                persisted = self.persist(&model_id);
            }
            tracing::info!(
                tools = self.len(),
                refreshed,
                fingerprint = %plan.fingerprint,
                "Tool set unchanged, no embedding needed"
            );
            return Ok(UpdateOutcome {
                changed: false,
                fingerprint: plan.fingerprint,
                refreshed,
                tool_count: self.len(),
                persisted,
                ..UpdateOutcome::default()
            });
        }

        let removed: BTreeSet<&str> = plan.removed.iter().map(String::as_str).collect();
        let surviving_dim = if plan.model_changed {
            None
        } else {
            let dirty: BTreeSet<&str> = plan
                .dirty
                .iter()
                .map(|p| p.definition.name.as_str())
                .collect();
            self.snapshot
                .records
                .values()
                .find(|r| !removed.contains(r.name.as_str()) && !dirty.contains(r.name.as_str()))
                .map(|r| r.vector.len())
        };

        let (embedded, failed) = if plan.dirty.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let vectors = embed_pending(backend, &plan.dirty)?;
            partition_by_dimension(&plan.dirty, vectors, surviving_dim)
        };

        if !plan.dirty.is_empty() && embedded.is_empty() {
            return Err(AppError::ModelError(format!(
                "All {} tools failed to embed",
                plan.dirty.len()
            )));
        }

        let dimension = surviving_dim
            .or_else(|| embedded.first().map(|r: &EmbeddingRecord| r.vector.len()))
            .unwrap_or(0);

        for name in &plan.removed {
            self.snapshot.records.remove(name);
        }
        for name in &failed {
            // A previous vector from another model or of another size cannot stay.
            let stale = self
                .snapshot
                .records
                .get(name)
                .is_some_and(|r| plan.model_changed || r.vector.len() != dimension);
            if stale {
                self.snapshot.records.remove(name);
            }
        }
        for definition in &plan.refreshed {
            if let Some(record) = self.snapshot.records.get_mut(&definition.name) {
                record.definition = definition.clone();
            }
        }
        let embedded_count = embedded.len();
        for record in embedded {
            self.snapshot.records.insert(record.name.clone(), record);
        }

        let persisted = self.persist(&model_id);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if failed.is_empty() {
            tracing::info!(
                embedded = embedded_count,
                removed = plan.removed.len(),
                tools = self.len(),
                elapsed_ms,
                "Vector store updated"
            );
        } else {
            tracing::warn!(
                embedded = embedded_count,
                removed = plan.removed.len(),
                failed = ?failed,
                tools = self.len(),
                elapsed_ms,
                "Vector store partially updated"
            );
        }

        metrics::counter!("store_updates_total").increment(1);
        metrics::counter!("tools_embedded_total").increment(embedded_count as u64);
        metrics::histogram!("update_latency_ms").record(elapsed_ms as f64);

        Ok(UpdateOutcome {
            changed: true,
            fingerprint: plan.fingerprint,
            embedded: embedded_count,
            removed: plan.removed.len(),
            refreshed: plan.refreshed.len(),
            failed,
            tool_count: self.len(),
            persisted,
        })
    }

    /// Rewrite the manifest from the current records and save. Failure is logged.
    fn persist(&mut self, model_id: &str) -> bool {
        let fingerprint = fingerprint_texts(
            self.snapshot
                .records
                .values()
                .map(|r| r.descriptor_text.as_str()),
        );
        self.snapshot.manifest = Some(Manifest {
            format_version: FORMAT_VERSION,
            model_id: model_id.to_string(),
            fingerprint,
            updated_at: Utc::now(),
            record_count: self.snapshot.records.len(),
            dimension: self.dimension().unwrap_or(0),
        });

        match self.snapshot.save(&self.dir) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    dir = %self.dir.display(),
                    error = %e,
                    "Failed to persist vector store; keeping in-memory state"
                );
                metrics::counter!("snapshot_save_failures_total").increment(1);
                false
            }
        }
    }
}

/// Embed all pending tools in one batch, retrying missing ones one at a time.
///
/// Returns one slot per pending tool; `None` marks a tool that failed twice.
fn embed_pending(backend: &mut LazyBackend, pending: &[PendingTool]) -> Result<Vec<Option<Vec<f32>>>> {
    let embedder = backend.ensure_loaded()?;
    let texts: Vec<String> = pending.iter().map(|p| p.descriptor_text.clone()).collect();

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; pending.len()];
    match embedder.embed(&texts) {
        Ok(vectors) => {
            if vectors.len() != texts.len() {
                tracing::warn!(
                    requested = texts.len(),
                    returned = vectors.len(),
                    "Embedding batch came back short"
                );
            }
            for (slot, vector) in slots.iter_mut().zip(vectors) {
                *slot = Some(vector);
            }
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                batch = texts.len(),
                "Embedding batch failed, retrying tools individually"
            );
        }
    }

    for (slot, tool) in slots.iter_mut().zip(pending) {
        if slot.is_some() {
            continue;
        }
        match embedder.embed(std::slice::from_ref(&tool.descriptor_text)) {
            Ok(mut vectors) if vectors.len() == 1 => *slot = vectors.pop(),
            Ok(vectors) => tracing::warn!(
                tool = %tool.definition.name,
                returned = vectors.len(),
                "Embedding retry returned an unexpected number of vectors"
            ),
            Err(e) => tracing::warn!(
                tool = %tool.definition.name,
                error = %e,
                "Embedding retry failed"
            ),
        }
    }

    Ok(slots)
}

/// Split embedding results into new records and failed tool names.
///
/// A vector is only accepted if it matches `expected_dim`, or, when there is
/// no surviving record to match, the dimension of the first usable vector.
fn partition_by_dimension(
    pending: &[PendingTool],
    vectors: Vec<Option<Vec<f32>>>,
    expected_dim: Option<usize>,
) -> (Vec<EmbeddingRecord>, Vec<String>) {
    let mut dimension = expected_dim;
    let mut embedded = Vec::new();
    let mut failed = Vec::new();

    for (tool, vector) in pending.iter().zip(vectors) {
        let name = tool.definition.name.clone();
        let Some(vector) = vector.filter(|v| !v.is_empty()) else {
            failed.push(name);
            continue;
        };
        let expected = *dimension.get_or_insert(vector.len());
        if vector.len() != expected {
            tracing::warn!(
                tool = %name,
                dimension = vector.len(),
                expected,
                "Rejecting vector with mismatched dimension"
            );
            failed.push(name);
            continue;
        }
        embedded.push(EmbeddingRecord {
            name,
            vector,
            descriptor_text: tool.descriptor_text.clone(),
            definition: tool.definition.clone(),
        });
    }

    (embedded, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{Embedder, HashingEmbedder};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Hashing embedder that counts `embed` calls and loads.
    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: Arc<AtomicUsize>,
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts)
        }
    }

    struct Counters {
        loads: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    fn counting_backend(model_id: &str) -> (LazyBackend, Counters) {
        let loads = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            loads: Arc::clone(&loads),
            calls: Arc::clone(&calls),
        };
        let id = model_id.to_string();
        let backend = LazyBackend::with_loader(model_id, move || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingEmbedder {
                inner: HashingEmbedder::new(id.clone(), 64),
                calls: Arc::clone(&calls),
            }) as Box<dyn Embedder>)
        });
        (backend, counters)
    }

    /// Fails whole batches of more than one text and any text containing `poison`.
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        poison: &'static str,
    }

    impl Embedder for FlakyEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.len() > 1 || texts.iter().any(|t| t.contains(self.poison)) {
                return Err(AppError::ModelError("flaky".to_string()));
            }
            self.inner.embed(texts)
        }
    }

    fn tool(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition::new(name, description, json!({}), "test")
    }

    #[test]
    fn test_update_is_idempotent() {
        let dir = tempdir().unwrap();
        let tools = vec![tool("read_file", "Reads a file"), tool("send_email", "Sends an email")];
        let (mut backend, counters) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());

        let first = store.update(&tools, &mut backend, false).unwrap();
        assert!(first.changed);
        assert_eq!(first.embedded, 2);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
        let stamp = store.manifest().unwrap().updated_at;

        let second = store.update(&tools, &mut backend, false).unwrap();
        assert!(!second.changed);
        assert_eq!(second.embedded, 0);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.manifest().unwrap().updated_at, stamp);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_unchanged_tools_do_not_load_backend() {
        let dir = tempdir().unwrap();
        let tools = vec![tool("a", "alpha")];
        {
            let (mut backend, _) = counting_backend("m1");
            let mut store = VectorStore::load(dir.path());
            store.update(&tools, &mut backend, false).unwrap();
        }

        let (mut backend, counters) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        assert_eq!(store.len(), 1);

        let outcome = store.update(&tools, &mut backend, false).unwrap();
        assert!(!outcome.changed);
        assert!(!backend.is_loaded());
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_changed_description_reembeds_only_that_tool() {
        let dir = tempdir().unwrap();
        let (mut backend, _) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        store
            .update(&[tool("a", "alpha"), tool("b", "beta")], &mut backend, false)
            .unwrap();
        let b_before = store.get("b").unwrap().vector.clone();

        let outcome = store
            .update(&[tool("a", "alpha"), tool("b", "beta, revised")], &mut backend, false)
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.embedded, 1);
        assert_ne!(store.get("b").unwrap().vector, b_before);
    }

    #[test]
    fn test_removed_tools_are_collected() {
        let dir = tempdir().unwrap();
        let (mut backend, counters) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        store
            .update(&[tool("a", "alpha"), tool("b", "beta")], &mut backend, false)
            .unwrap();

        let outcome = store.update(&[tool("a", "alpha")], &mut backend, false).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.embedded, 0);
        assert_eq!(store.names(), vec!["a".to_string()]);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);

        let reloaded = VectorStore::load(dir.path());
        assert_eq!(reloaded.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_force_reembeds_everything() {
        let dir = tempdir().unwrap();
        let tools = vec![tool("a", "alpha"), tool("b", "beta")];
        let (mut backend, counters) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        store.update(&tools, &mut backend, false).unwrap();

        let outcome = store.update(&tools, &mut backend, true).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.embedded, 2);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_model_change_invalidates_all_vectors() {
        let dir = tempdir().unwrap();
        let tools = vec![tool("a", "alpha"), tool("b", "beta")];
        let (mut old_backend, _) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        store.update(&tools, &mut old_backend, false).unwrap();

        let (mut new_backend, _) = counting_backend("m2");
        let plan = store.plan(&tools, new_backend.model_id(), false);
        assert!(plan.model_changed);
        assert_eq!(plan.dirty.len(), 2);

        store.update(&tools, &mut new_backend, false).unwrap();
        assert_eq!(store.manifest().unwrap().model_id, "m2");
    }

    #[test]
    fn test_definition_only_change_refreshes_without_embedding() {
        let dir = tempdir().unwrap();
        let (mut backend, counters) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        let original = tool("a", "alpha");
        store.update(&[original.clone()], &mut backend, false).unwrap();

        // Descriptor text ignores extra schema keys such as `additionalProperties`
        let mut revised = original;
        revised.parameters = json!({ "additionalProperties": false });
        let outcome = store.update(&[revised.clone()], &mut backend, false).unwrap();

        assert!(!outcome.changed);
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("a").unwrap().definition, revised);
        assert_eq!(
            VectorStore::load(dir.path()).get("a").unwrap().definition,
            revised
        );
    }

    #[test]
    fn test_duplicate_names_keep_last_definition() {
        let dir = tempdir().unwrap();
        let (mut backend, _) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());

        store
            .update(&[tool("a", "first"), tool("a", "second")], &mut backend, false)
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().definition.description, "second");
    }

    #[test]
    fn test_partial_failure_commits_successes() {
        let dir = tempdir().unwrap();
        let mut backend = LazyBackend::with_loader("flaky", || {
            Ok(Box::new(FlakyEmbedder {
                inner: HashingEmbedder::new("flaky", 32),
                poison: "explode",
            }) as Box<dyn Embedder>)
        });
        let mut store = VectorStore::load(dir.path());

        let outcome = store
            .update(
                &[tool("good", "works fine"), tool("bad", "will explode")],
                &mut backend,
                false,
            )
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.embedded, 1);
        assert_eq!(outcome.failed, vec!["bad".to_string()]);
        assert_eq!(store.names(), vec!["good".to_string()]);
        assert!(outcome.persisted);
    }

    #[test]
    fn test_total_failure_mutates_nothing() {
        let dir = tempdir().unwrap();
        let (mut backend, _) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        store.update(&[tool("a", "alpha")], &mut backend, false).unwrap();
        let manifest = store.manifest().cloned();

        let mut broken = LazyBackend::with_loader("m1", || {
            Ok(Box::new(FlakyEmbedder {
                inner: HashingEmbedder::new("m1", 64),
                poison: "TOOL",
            }) as Box<dyn Embedder>)
        });
        let result = store.update(&[tool("a", "alpha"), tool("b", "beta")], &mut broken, false);

        assert!(matches!(result, Err(AppError::ModelError(_))));
        assert_eq!(store.names(), vec!["a".to_string()]);
        assert_eq!(store.manifest().cloned(), manifest);
    }

    #[test]
    fn test_backend_load_failure_is_model_error() {
        let dir = tempdir().unwrap();
        let mut backend = LazyBackend::with_loader("missing", || {
            Err(AppError::ModelError("no weights".to_string()))
        });
        let mut store = VectorStore::load(dir.path());

        let result = store.update(&[tool("a", "alpha")], &mut backend, false);

        assert!(matches!(result, Err(AppError::ModelError(_))));
        assert!(store.is_empty());
        assert!(store.manifest().is_none());
    }

    #[test]
    fn test_empty_tool_set_clears_store_without_backend() {
        let dir = tempdir().unwrap();
        let (mut backend, _) = counting_backend("m1");
        let mut store = VectorStore::load(dir.path());
        store.update(&[tool("a", "alpha")], &mut backend, false).unwrap();

        let (mut cold, counters) = counting_backend("m1");
        let outcome = store.update(&[], &mut cold, false).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.tool_count, 0);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dimension_mismatch_counts_as_failure() {
        let pending = vec![
            PendingTool {
                definition: tool("a", "alpha"),
                descriptor_text: "A".to_string(),
            },
            PendingTool {
                definition: tool("b", "beta"),
                descriptor_text: "B".to_string(),
            },
        ];
        let vectors = vec![Some(vec![1.0, 0.0]), Some(vec![1.0, 0.0, 0.0])];

        let (embedded, failed) = partition_by_dimension(&pending, vectors, None);

        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].name, "a");
        assert_eq!(failed, vec!["b".to_string()]);
    }
}
