//! Tool retrieval: vector store, change detection, ranking, and the service
//! that composes them.

pub mod ranker;
pub mod service;
pub mod store;

pub use ranker::{cosine_similarity, rank};
pub use service::{RetrievalService, SearchHit};
pub use store::{UpdateOutcome, UpdatePlan, VectorStore};
