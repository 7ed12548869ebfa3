//! The retrieval core: vector store, lazy backend and ranker behind one value.
//!
//! Synchronous by design. The server wraps it in a mutex and calls it from
//! the blocking pool; the client facade owns one directly for local fallback.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::inference::LazyBackend;
use crate::ingestion::ToolDefinition;
use crate::retrieval::ranker::rank;
use crate::retrieval::store::{UpdateOutcome, VectorStore};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub score: f64,
    pub definition: ToolDefinition,
}

pub struct RetrievalService {
    store: VectorStore,
    backend: LazyBackend,
}

impl RetrievalService {
    /// Load the snapshot from `config.store_dir`. The backend stays unloaded.
    pub fn open(config: &Config) -> Self {
        Self::new(
            VectorStore::load(&config.store_dir),
            LazyBackend::from_config(config),
        )
    }

    pub fn new(store: VectorStore, backend: LazyBackend) -> Self {
        Self { store, backend }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn tool_count(&self) -> usize {
        self.store.len()
    }

    pub fn backend_loaded(&self) -> bool {
        self.backend.is_loaded()
    }

    /// Load the backend now instead of on first use.
    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.ensure_loaded().map(|_| ())
    }

    pub fn update(&mut self, tools: &[ToolDefinition], force: bool) -> Result<UpdateOutcome> {
        self.store.update(tools, &mut self.backend, force)
    }

    /// Tools most relevant to `query`, best first.
    ///
    /// `top_k == 0` and an empty store return nothing without loading the backend.
    pub fn search(&mut self, query: &str, top_k: i64) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Query cannot be empty".to_string(),
            ));
        }
        if top_k < 0 {
            return Err(AppError::ValidationError(format!(
                "top_k must not be negative, got {}",
                top_k
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if self.store.is_empty() {
            tracing::warn!("No tools embedded yet; run an update first");
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let query_vector = self
            .backend
            .embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ModelError("Backend returned no query vector".to_string()))?;

        if let Some(dimension) = self.store.dimension() {
            if query_vector.len() != dimension {
                return Err(AppError::ModelError(format!(
                    "Query vector has dimension {}, store has {}; run a forced update",
                    query_vector.len(),
                    dimension
                )));
            }
        }

        let hits: Vec<SearchHit> = rank(&query_vector, &self.store, top_k)
            .into_iter()
            .filter_map(|(name, score)| {
                self.store.get(&name).map(|record| SearchHit {
                    name,
                    score,
                    definition: record.definition.clone(),
                })
            })
            .collect();

        tracing::debug!(
            query,
            top_k,
            results = hits.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search completed"
        );

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{Embedder, HashingEmbedder};
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    fn tool(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition::new(name, description, json!({}), "fs")
    }

    fn service(dir: &Path) -> RetrievalService {
        let id = "hashing-ngram-384";
        RetrievalService::new(
            VectorStore::load(dir),
            LazyBackend::with_loader(id, move || {
                Ok(Box::new(HashingEmbedder::new(id, 384)) as Box<dyn Embedder>)
            }),
        )
    }

    #[test]
    fn test_example_scenario() {
        let dir = tempdir().unwrap();
        let mut svc = service(dir.path());

        svc.update(&[tool("A", "reads a file"), tool("B", "writes a file")], false)
            .unwrap();
        let hits = svc.search("read contents of a file", 5).unwrap();
        assert_eq!(hits[0].name, "A");
        assert_eq!(hits[1].name, "B");
        assert!(hits[0].score > hits[1].score);

        let b_vector = svc.store().get("B").unwrap().vector.clone();
        let outcome = svc
            .update(&[tool("B", "writes a file"), tool("C", "deletes a file")], false)
            .unwrap();
        assert_eq!(outcome.embedded, 1);
        assert_eq!(outcome.removed, 1);

        let hits = svc.search("read contents of a file", 5).unwrap();
        assert!(hits.iter().all(|h| h.name != "A"));
        assert_eq!(svc.store().get("B").unwrap().vector, b_vector);
        assert!(svc.store().get("C").is_some());
    }

    #[test]
    fn test_search_validation() {
        let dir = tempdir().unwrap();
        let mut svc = service(dir.path());

        assert!(matches!(svc.search("", 5), Err(AppError::ValidationError(_))));
        assert!(matches!(svc.search("   ", 5), Err(AppError::ValidationError(_))));
        assert!(matches!(svc.search("q", -1), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_empty_store_search_stays_cold() {
        let dir = tempdir().unwrap();
        let mut svc = service(dir.path());

        assert!(svc.search("anything", 5).unwrap().is_empty());
        assert!(!svc.backend_loaded());
    }

    #[test]
    fn test_zero_top_k_stays_cold() {
        let dir = tempdir().unwrap();
        service(dir.path())
            .update(&[tool("A", "reads a file")], false)
            .unwrap();

        let mut svc = service(dir.path());
        assert!(svc.search("read", 0).unwrap().is_empty());
        assert!(!svc.backend_loaded());
    }

    #[test]
    fn test_results_include_definition() {
        let dir = tempdir().unwrap();
        let mut svc = service(dir.path());
        let definition = ToolDefinition::new(
            "read_file",
            "Reads a file",
            json!({ "properties": { "path": { "type": "string" } }, "required": ["path"] }),
            "fs",
        );
        svc.update(std::slice::from_ref(&definition), false).unwrap();

        let hits = svc.search("read a file", 1).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].definition, definition);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let dir = tempdir().unwrap();
        service(dir.path())
            .update(&[tool("A", "reads a file")], false)
            .unwrap();

        let mut svc = RetrievalService::new(
            VectorStore::load(dir.path()),
            LazyBackend::preloaded(Box::new(HashingEmbedder::new("hashing-ngram-384", 16))),
        );

        assert!(matches!(svc.search("read", 3), Err(AppError::ModelError(_))));
    }
}
