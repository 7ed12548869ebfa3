//! Where the current tool set comes from.
//!
//! The retrieval core never discovers tools itself. `/update` and the local
//! update path ask a [`ToolSource`] for the current definitions.

use crate::error::{AppError, Result};
use crate::ingestion::atomizer::atomize_tools;
use crate::ingestion::types::ToolDefinition;
use serde_json::Value;
use std::path::PathBuf;

/// Supplies the current tool set.
pub trait ToolSource: Send + Sync {
    fn load(&self) -> Result<Vec<ToolDefinition>>;
}

/// Reads tools from a JSON file keyed by MCP server name.
///
/// ```json
/// {
///   "filesystem": { "jsonrpc": "2.0", "result": { "tools": [ ... ] } },
///   "github": [ { "name": "create_issue", "description": "...", "inputSchema": { ... } } ]
/// }
/// ```
///
/// A missing file is an empty tool set, not an error.
pub struct JsonFileToolSource {
    path: Option<PathBuf>,
}

impl JsonFileToolSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ToolSource for JsonFileToolSource {
    fn load(&self) -> Result<Vec<ToolDefinition>> {
        let Some(path) = &self.path else {
            tracing::debug!("No tools file configured");
            return Ok(Vec::new());
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "Tools file does not exist");
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ToolSourceError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let json: Value = serde_json::from_str(&raw).map_err(|e| {
            AppError::ToolSourceError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        let servers = json.as_object().ok_or_else(|| {
            AppError::ToolSourceError(format!(
                "{} must contain an object keyed by server name",
                path.display()
            ))
        })?;

        let mut tools = Vec::new();
        for (server_name, payload) in servers {
            tools.extend(atomize_tools(payload, server_name)?);
        }

        tracing::info!(
            path = %path.display(),
            servers = servers.len(),
            tools = tools.len(),
            "Loaded tool definitions"
        );

        Ok(tools)
    }
}

/// A fixed tool set, for embedding this crate in a host that already has its tools in memory.
pub struct StaticToolSource {
    tools: Vec<ToolDefinition>,
}

impl StaticToolSource {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }
}

impl ToolSource for StaticToolSource {
    fn load(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self.tools.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let source = JsonFileToolSource::new(Some(dir.path().join("nope.json")));
        assert!(source.load().unwrap().is_empty());
        assert!(JsonFileToolSource::new(None).load().unwrap().is_empty());
    }

    #[test]
    fn test_loads_every_server() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tools.json");
        let body = json!({
            "filesystem": { "result": { "tools": [
                { "name": "read_file", "description": "reads a file" },
                { "name": "write_file", "description": "writes a file" }
            ] } },
            "github": [ { "name": "create_issue", "description": "opens an issue" } ]
        });
        std::fs::write(&path, body.to_string()).unwrap();

        let tools = JsonFileToolSource::new(Some(path)).load().unwrap();
        assert_eq!(tools.len(), 3);
        let issue = tools.iter().find(|t| t.name == "create_issue").unwrap();
        assert_eq!(issue.origin, "github");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = JsonFileToolSource::new(Some(path)).load();
        assert!(matches!(result, Err(AppError::ToolSourceError(_))));
    }
}
