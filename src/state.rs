use crate::config::Config;
use crate::ingestion::{JsonFileToolSource, ToolSource};
use crate::process::RuntimeFiles;
use crate::retrieval::RetrievalService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Application state shared across all request handlers.
///
/// The retrieval core is synchronous and single-writer, so it sits behind a
/// plain mutex and is only touched from the blocking pool. `/health` reads
/// `tool_count` instead and never contends for the lock.
pub struct AppState {
    pub service: Mutex<RetrievalService>,
    pub tool_source: Arc<dyn ToolSource>,
    tool_count: AtomicUsize,
    pub runtime: RuntimeFiles,
    pub config: Arc<Config>,
    /// Fired by `/shutdown` to start graceful shutdown.
    pub shutdown: Notify,
}

impl AppState {
    /// State for the resident server: snapshot from disk, tools from the tools file.
    pub fn from_config(config: Config) -> Self {
        let service = RetrievalService::open(&config);
        let tool_source = Arc::new(JsonFileToolSource::new(config.tools_path.clone()));
        Self::new(config, service, tool_source)
    }

    pub fn new(config: Config, service: RetrievalService, tool_source: Arc<dyn ToolSource>) -> Self {
        tracing::info!(tools = service.tool_count(), "Retrieval service ready");
        Self {
            tool_count: AtomicUsize::new(service.tool_count()),
            service: Mutex::new(service),
            tool_source,
            runtime: RuntimeFiles::new(config.runtime_dir.clone()),
            config: Arc::new(config),
            shutdown: Notify::new(),
        }
    }

    /// Lock the retrieval core. A panic in an earlier holder does not
    /// invalidate the store, which is only mutated after all fallible work.
    pub fn lock_service(&self) -> MutexGuard<'_, RetrievalService> {
        self.service.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::error!("Retrieval service lock was poisoned; continuing");
            poisoned.into_inner()
        })
    }

    pub fn tool_count(&self) -> usize {
        self.tool_count.load(Ordering::SeqCst)
    }

    /// Publish a new tool count to `/health` and the status file.
    pub fn set_tool_count(&self, count: usize) {
        self.tool_count.store(count, Ordering::SeqCst);
        if let Err(e) = self.runtime.set_tool_count(count) {
            tracing::warn!(error = %e, "Failed to refresh tool count in status file");
        }
    }
}
