use crate::error::{AppError, Result};
use crate::retrieval::UpdateOutcome;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Re-embed every tool even if its descriptor text is unchanged.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: String,
    pub tool_count: usize,
    #[serde(default)]
    pub failed: Vec<String>,
}

impl UpdateResponse {
    /// The tool source had nothing to offer; the store was left as is.
    pub fn empty_source(tool_count: usize) -> Self {
        Self {
            success: false,
            message: "No tools available from the tool source".to_string(),
            tool_count,
            failed: Vec::new(),
        }
    }

    pub fn from_outcome(outcome: &UpdateOutcome) -> Self {
        let mut message = if !outcome.changed {
            format!("Embeddings are up to date ({} tools)", outcome.tool_count)
        } else {
            format!(
                "Embedded {} tools, removed {}, {} total",
                outcome.embedded, outcome.removed, outcome.tool_count
            )
        };
        if !outcome.failed.is_empty() {
            message.push_str(&format!("; {} failed to embed", outcome.failed.len()));
        }
        if !outcome.persisted {
            message.push_str("; snapshot could not be saved");
        }

        Self {
            success: outcome.failed.is_empty() && outcome.persisted,
            message,
            tool_count: outcome.tool_count,
            failed: outcome.failed.clone(),
        }
    }
}

/// POST /update - Reload the tool set and refresh stale embeddings.
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<UpdateRequest>>,
) -> Result<Json<UpdateResponse>> {
    let start_time = std::time::Instant::now();
    let force = body.map(|Json(request)| request.force).unwrap_or(false);

    let worker_state = Arc::clone(&state);
    let response = tokio::task::spawn_blocking(move || -> Result<UpdateResponse> {
        let tools = worker_state.tool_source.load()?;
        if tools.is_empty() {
            tracing::warn!("Tool source returned no tools; keeping current embeddings");
            return Ok(UpdateResponse::empty_source(worker_state.tool_count()));
        }

        let outcome = worker_state.lock_service().update(&tools, force)?;
        worker_state.set_tool_count(outcome.tool_count);
        Ok(UpdateResponse::from_outcome(&outcome))
    })
    .await
    .map_err(|e| AppError::ModelError(format!("Update task join error: {}", e)))??;

    tracing::info!(
        force,
        success = response.success,
        tool_count = response.tool_count,
        total_ms = start_time.elapsed().as_millis() as u64,
        "Update completed"
    );
    metrics::counter!("update_requests_total").increment(1);

    Ok(Json(response))
}
