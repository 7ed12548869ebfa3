//! Ingestion module for the tool-providing side.
//!
//! Turns MCP (Model Context Protocol) tool listings into [`ToolDefinition`]
//! records and renders each one into the descriptor text that gets embedded.

pub mod atomizer;
pub mod descriptor;
pub mod source;
pub mod types;

pub use atomizer::{atomize_tools, AtomizerResult};
pub use descriptor::descriptor_text;
pub use source::{JsonFileToolSource, StaticToolSource, ToolSource};
pub use types::ToolDefinition;
