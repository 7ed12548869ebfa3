use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Gap between answering `/shutdown` and starting the graceful shutdown,
/// so the response reaches the caller first.
const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub message: String,
}

/// POST /shutdown - Begin graceful shutdown shortly after responding.
pub async fn shutdown_handler(State(state): State<Arc<AppState>>) -> Json<ShutdownResponse> {
    tracing::info!("Shutdown requested over HTTP");

    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DELAY).await;
        state.shutdown.notify_one();
    });

    Json(ShutdownResponse {
        message: "Server shutting down".to_string(),
    })
}
