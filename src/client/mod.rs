//! Client facade: use the resident server when it answers, otherwise run
//! the retrieval core in-process against the on-disk snapshot.
//!
//! The facade never starts the server. A search that fails or times out
//! remotely falls back to the local core; contract errors (bad query) do
//! not. Updates run locally only when no server answers: a live server is
//! the only writer of the snapshot.

pub mod remote;

pub use remote::RemoteClient;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::handlers::UpdateResponse;
use crate::ingestion::{JsonFileToolSource, ToolSource};
use crate::retrieval::{RetrievalService, SearchHit};
use std::sync::{Arc, Mutex};

/// Where the last answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Remote,
    Local,
}

pub struct ToolSearchClient {
    config: Config,
    remote: RemoteClient,
    local: Option<Arc<Mutex<RetrievalService>>>,
    last_route: Option<Route>,
}

impl ToolSearchClient {
    pub fn new(config: Config) -> Result<Self> {
        let remote = RemoteClient::new(&config)?;
        Ok(Self {
            config,
            remote,
            local: None,
            last_route: None,
        })
    }

    pub fn last_route(&self) -> Option<Route> {
        self.last_route
    }

    /// Top-`top_k` tools for `query`, best first.
    pub async fn search(&mut self, query: &str, top_k: i64) -> Result<Vec<SearchHit>> {
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

        if self.remote.is_live().await {
            match self.remote.search(query, top_k).await {
                Ok(hits) => {
                    self.last_route = Some(Route::Remote);
                    return Ok(hits);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Remote search failed, searching locally");
                }
                Err(e) => return Err(e),
            }
        }

        let service = self.local_service();
        let query = query.to_string();
        let hits = tokio::task::spawn_blocking(move || -> Result<Vec<SearchHit>> {
            let mut service = service
                .lock()
                .map_err(|_| AppError::ModelError("Local retrieval service is unusable".to_string()))?;
            service.search(&query, top_k)
        })
        .await
        .map_err(|e| AppError::ModelError(format!("Local search task join error: {}", e)))??;

        self.last_route = Some(Route::Local);
        Ok(hits)
    }

    /// Refresh embeddings from the tool source.
    ///
    /// Goes through the server whenever it answers `/health`. A remote
    /// failure is returned as is; updating locally while the server may
    /// still be writing the same snapshot would leave two writers.
    pub async fn update(&mut self, force: bool) -> Result<UpdateResponse> {
        if self.remote.is_live().await {
            let response = self.remote.update(force).await.map_err(|e| {
                if e.is_transient() {
                    AppError::ResourceError(format!(
                        "Server is running but the update did not complete ({}); retry later",
                        e
                    ))
                } else {
                    e
                }
            })?;
            self.last_route = Some(Route::Remote);
            return Ok(response);
        }

        let service = self.local_service();
        let source = JsonFileToolSource::new(self.config.tools_path.clone());
        let response = tokio::task::spawn_blocking(move || -> Result<UpdateResponse> {
            let mut service = service
                .lock()
                .map_err(|_| AppError::ModelError("Local retrieval service is unusable".to_string()))?;
            let tools = source.load()?;
            if tools.is_empty() {
                return Ok(UpdateResponse::empty_source(service.tool_count()));
            }
            let outcome = service.update(&tools, force)?;
            Ok(UpdateResponse::from_outcome(&outcome))
        })
        .await
        .map_err(|e| AppError::ModelError(format!("Local update task join error: {}", e)))??;

        self.last_route = Some(Route::Local);
        Ok(response)
    }

    /// The in-process core, opened on first use.
    fn local_service(&mut self) -> Arc<Mutex<RetrievalService>> {
        let config = &self.config;
        let service = self.local.get_or_insert_with(|| {
            tracing::info!(store = %config.store_dir.display(), "Opening local retrieval service");
            Arc::new(Mutex::new(RetrievalService::open(config)))
        });
        Arc::clone(service)
    }
}
