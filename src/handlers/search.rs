//! Semantic search handler for tool discovery.
//!
//! Embeds the query with the same backend used for the tool descriptors and
//! returns the closest tools together with their full definitions, so the
//! caller can hand them straight to the model.

use crate::error::{AppError, Result};
use crate::retrieval::SearchHit;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The natural language query to match against tools. A missing field
    /// is treated as an empty query.
    #[serde(default)]
    pub query: String,
    /// Number of results to return. Defaults to the configured top-k.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
}

/// POST /search - Find tools relevant to a natural language query.
///
/// `400` for an unparseable body, an empty or blank query or a negative
/// `top_k`; `top_k = 0` returns an empty list.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchHit>>> {
    let start_time = std::time::Instant::now();
    let Json(request) = payload
        .map_err(|e| AppError::ValidationError(format!("Invalid search request: {}", e)))?;

    if request.query.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Query cannot be empty".to_string(),
        ));
    }

    let top_k = request.top_k.unwrap_or(state.config.default_top_k);
    if top_k < 0 {
        return Err(AppError::ValidationError(format!(
            "top_k must not be negative, got {}",
            top_k
        )));
    }

    let worker_state = Arc::clone(&state);
    let query = request.query.clone();

    // Embedding is CPU-bound and may trigger the first model load
    let hits = tokio::task::spawn_blocking(move || {
        let mut service = worker_state.lock_service();
        service.search(&query, top_k)
    })
    .await
    .map_err(|e| AppError::ModelError(format!("Search task join error: {}", e)))??;

    let total_time = start_time.elapsed();
    tracing::info!(
        query = %request.query,
        top_k,
        results = hits.len(),
        total_ms = total_time.as_millis() as u64,
        "Search completed"
    );

    metrics::counter!("search_requests_total").increment(1);
    metrics::histogram!("search_latency_ms").record(total_time.as_millis() as f64);

    Ok(Json(hits))
}
