//! The resident HTTP server (`toolseek serve`).

use crate::config::Config;
use crate::handlers::{health_handler, search_handler, shutdown_handler, update_handler};
use crate::process::StatusRecord;
use crate::state::AppState;
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Router with every endpoint. `/metrics` is only mounted when a recorder handle is given.
pub fn build_router(state: Arc<AppState>, metrics: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/search", post(search_handler))
        .route("/update", post(update_handler))
        .route("/shutdown", post(shutdown_handler));

    if let Some(handle) = metrics {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind to the configured loopback address and serve until shut down.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} (is another server running?)", addr))?;

    let start = std::time::Instant::now();
    let state = Arc::new(AppState::from_config(config));
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "State initialized",
    );

    serve(listener, state, Some(prometheus_handle)).await
}

/// Serve on an already bound listener.
///
/// Writes the PID and status files once listening and removes them after
/// shutdown. Shutdown is triggered by Ctrl+C, SIGTERM or `POST /shutdown`.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;

    state
        .runtime
        .write(&StatusRecord {
            running: true,
            pid: std::process::id(),
            port: addr.port(),
            start_time: Utc::now(),
            tool_count: state.tool_count(),
        })
        .context("Failed to write server status files")?;

    if state.config.preload_model {
        let warm_state = Arc::clone(&state);
        tokio::task::spawn_blocking(move || {
            let start = std::time::Instant::now();
            match warm_state.lock_service().warm_up() {
                Ok(()) => tracing::info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Embedding backend preloaded"
                ),
                Err(e) => tracing::error!(error = %e, "Embedding backend preload failed"),
            }
        });
    }

    let app = build_router(Arc::clone(&state), metrics);
    tracing::info!(address = %addr, "Server listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await;

    if let Err(e) = state.runtime.clear() {
        tracing::warn!(error = %e, "Failed to remove server status files");
    }
    result?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM or a `/shutdown` request.
/// After that, allows `drain_secs` for in-flight requests to complete.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = state.shutdown.notified() => {
            tracing::info!("Shutdown requested, initiating graceful shutdown");
        }
    }

    let timeout_secs = state.config.drain_secs;
    if timeout_secs > 0 {
        tracing::info!(timeout_secs, "Draining connections...");
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
    }
}
