pub mod health;
pub mod search;
pub mod shutdown;
pub mod update;

pub use health::{health_handler, HealthResponse};
pub use search::{search_handler, SearchRequest};
pub use shutdown::{shutdown_handler, ShutdownResponse};
pub use update::{update_handler, UpdateRequest, UpdateResponse};
