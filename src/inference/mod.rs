//! Embedding backends and the lazy handle the retrieval core holds.
//!
//! Loading a model is the largest latency and memory cost in the system, and
//! many invocations (`status`, `stop`, an idempotent `update`) never need it.
//! [`LazyBackend`] therefore starts [`BackendState::Unloaded`] and only builds
//! the embedder the first time [`LazyBackend::ensure_loaded`] is called.

#[cfg(feature = "onnx")]
pub mod bi_encoder;
pub mod hashing;

#[cfg(feature = "onnx")]
pub use bi_encoder::OnnxEmbedder;
pub use hashing::HashingEmbedder;

use crate::config::{Config, EmbeddingProvider};
use crate::error::{AppError, Result};
use std::time::Instant;

/// Turns text into fixed-length vectors.
///
/// Implementations must be batched, order-preserving and deterministic for
/// identical input and model version.
pub trait Embedder: Send {
    /// Identity recorded in the snapshot manifest.
    fn model_id(&self) -> &str;

    /// Embed `texts`, one vector per input, in input order.
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

type Loader = Box<dyn Fn() -> Result<Box<dyn Embedder>> + Send>;

pub enum BackendState {
    Unloaded,
    Loaded(Box<dyn Embedder>),
}

/// An embedder that is built on first use and then kept for the life of its owner.
pub struct LazyBackend {
    model_id: String,
    loader: Loader,
    state: BackendState,
}

impl LazyBackend {
    /// Backend selected by `config.provider`. Nothing is loaded yet.
    pub fn from_config(config: &Config) -> Self {
        let model_id = config.model_id.clone();
        match config.provider {
            EmbeddingProvider::Hashing => {
                let dims = config.hashing_dims;
                let id = model_id.clone();
                Self::with_loader(model_id, move || {
                    Ok(Box::new(HashingEmbedder::new(id.clone(), dims)) as Box<dyn Embedder>)
                })
            }
            EmbeddingProvider::Onnx => Self::onnx(config),
        }
    }

    #[cfg(feature = "onnx")]
    fn onnx(config: &Config) -> Self {
        let model_id = config.model_id.clone();
        let id = model_id.clone();
        let model_path = config.model_path.clone();
        let tokenizer_path = config.tokenizer_path.clone();
        let max_length = config.max_sequence_length;
        let intra_threads = config.intra_threads;
        Self::with_loader(model_id, move || {
            let model = OnnxEmbedder::load(
                id.clone(),
                &model_path,
                &tokenizer_path,
                max_length,
                intra_threads,
            )?;
            Ok(Box::new(model) as Box<dyn Embedder>)
        })
    }

    #[cfg(not(feature = "onnx"))]
    fn onnx(config: &Config) -> Self {
        Self::with_loader(config.model_id.clone(), || {
            Err(AppError::ModelError(
                "built without the `onnx` feature; set TOOLSEEK_EMBEDDING_PROVIDER=hashing"
                    .to_string(),
            ))
        })
    }

    /// Backend built by an arbitrary loader.
    pub fn with_loader<F>(model_id: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Embedder>> + Send + 'static,
    {
        Self {
            model_id: model_id.into(),
            loader: Box::new(loader),
            state: BackendState::Unloaded,
        }
    }

    /// Wrap an embedder that already exists. It counts as loaded.
    pub fn preloaded(embedder: Box<dyn Embedder>) -> Self {
        let model_id = embedder.model_id().to_string();
        Self {
            model_id: model_id.clone(),
            loader: Box::new(move || {
                Err(AppError::ModelError(format!(
                    "backend '{}' cannot be reloaded",
                    model_id
                )))
            }),
            state: BackendState::Loaded(embedder),
        }
    }

    /// Known without loading, so cache validity can be checked cheaply.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, BackendState::Loaded(_))
    }

    /// The single initialization path. A failed load leaves the backend unloaded.
    pub fn ensure_loaded(&mut self) -> Result<&mut dyn Embedder> {
        if let BackendState::Unloaded = self.state {
            tracing::info!(model_id = %self.model_id, "Loading embedding backend");
            let start = Instant::now();
            let embedder = (self.loader)().map_err(|e| {
                tracing::error!(model_id = %self.model_id, error = %e, "Embedding backend failed to load");
                e
            })?;
            if embedder.model_id() != self.model_id {
                tracing::warn!(
                    expected = %self.model_id,
                    actual = %embedder.model_id(),
                    "Loaded backend reports a different model id"
                );
            }
            tracing::info!(
                model_id = %self.model_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Embedding backend loaded"
            );
            metrics::counter!("backend_loads_total").increment(1);
            self.state = BackendState::Loaded(embedder);
        }

        match &mut self.state {
            BackendState::Loaded(embedder) => Ok(embedder.as_mut()),
            BackendState::Unloaded => Err(AppError::ModelError(
                "embedding backend is not loaded".to_string(),
            )),
        }
    }

    pub fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.ensure_loaded()?.embed(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_loader_runs_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let mut backend = LazyBackend::with_loader("hashing-test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HashingEmbedder::new("hashing-test", 16)) as Box<dyn Embedder>)
        });

        assert!(!backend.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        backend.embed(&["one".to_string()]).unwrap();
        backend.embed(&["two".to_string()]).unwrap();

        assert!(backend.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_stays_unloaded_and_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut backend = LazyBackend::with_loader("broken", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::ModelError("no weights".to_string()))
        });

        assert!(backend.ensure_loaded().is_err());
        assert!(backend.ensure_loaded().is_err());
        assert!(!backend.is_loaded());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_config_does_not_load() {
        let config = Config::for_home("/nonexistent".into()).with_hashing_backend(32);
        let backend = LazyBackend::from_config(&config);

        assert!(!backend.is_loaded());
        assert_eq!(backend.model_id(), "hashing-ngram-32");
    }
}
