//! toolseek - semantic tool retrieval service
//!
//! Keeps one embedding per known tool and answers "which tools matter for
//! this query" in milliseconds. A resident server amortizes the model load;
//! short-lived callers go through [`ToolSearchClient`], which falls back to
//! an in-process [`RetrievalService`] when no server is running.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod ingestion;
pub mod persistence;
pub mod process;
pub mod retrieval;
pub mod server;
pub mod state;

// Re-export key types for convenience
pub use client::ToolSearchClient;
pub use config::Config;
pub use error::{AppError, Result};
pub use ingestion::{descriptor_text, ToolDefinition, ToolSource};
pub use process::ProcessManager;
pub use retrieval::{RetrievalService, SearchHit, VectorStore};
pub use state::AppState;
