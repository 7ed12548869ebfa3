//! Type definitions for the ingestion module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized tool definition as supplied by the tool-providing side.
///
/// Every field is already resolved to plain data: descriptions that were
/// computed lazily upstream must be turned into strings before a definition
/// is built. The retrieval core treats it as immutable input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier (from MCP tool.name)
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON schema of the tool's input (MCP `inputSchema`).
    #[serde(default = "empty_schema")]
    pub parameters: Value,

    /// The MCP server that provided this tool (e.g. "filesystem", "github")
    #[serde(default)]
    pub origin: String,
}

fn empty_schema() -> Value {
    Value::Object(Default::default())
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            origin: origin.into(),
        }
    }
}
