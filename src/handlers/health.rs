use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub tool_count: usize,
    pub version: String,
}

/// GET /health - Liveness probe. Reads the tool counter only, never the store lock.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        tool_count: state.tool_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
