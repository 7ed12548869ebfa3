//! Tool atomization logic for transforming MCP responses into tool definitions.
//!
//! This module parses MCP `tools/list` payloads and turns each tool into a
//! [`ToolDefinition`] tagged with the server it came from.

use crate::error::AppError;
use crate::ingestion::types::ToolDefinition;
use serde_json::Value;

/// Result type for atomizer operations
pub type AtomizerResult<T> = std::result::Result<T, AppError>;

/// Transform an MCP `tools/list` payload into tool definitions.
///
/// Accepted shapes:
/// - a full JSON-RPC response (`result.tools` array)
/// - an object with a `tools` array
/// - a bare array of tool objects
///
/// # Errors
/// Returns `AppError::ToolSourceError` if no tools array can be found, or if
/// every entry of a non-empty array is malformed. Individual malformed tools
/// are logged and skipped (partial success model).
///
/// # Example
/// ```ignore
/// let response = serde_json::json!({
///     "jsonrpc": "2.0",
///     "result": { "tools": [...] }
/// });
/// let tools = atomize_tools(&response, "filesystem")?;
/// ```
pub fn atomize_tools(json: &Value, server_name: &str) -> AtomizerResult<Vec<ToolDefinition>> {
    let entries = extract_tools_array(json)?;

    let tools: Vec<ToolDefinition> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            normalize_tool(entry, server_name)
                .map_err(|e| {
                    tracing::warn!(
                        index,
                        server = server_name,
                        error = %e,
                        "Skipping malformed tool definition"
                    )
                })
                .ok()
        })
        .collect();

    if tools.is_empty() && !entries.is_empty() {
        return Err(AppError::ToolSourceError(format!(
            "None of the {} tool definitions from '{}' could be parsed",
            entries.len(),
            server_name
        )));
    }

    tracing::debug!(
        server = server_name,
        listed = entries.len(),
        kept = tools.len(),
        "Tools atomized"
    );
    Ok(tools)
}

/// Locate the tools array in any of the accepted payload shapes.
fn extract_tools_array(json: &Value) -> AtomizerResult<&Vec<Value>> {
    if let Some(array) = json.as_array() {
        return Ok(array);
    }

    json.get("result")
        .and_then(|r| r.get("tools"))
        .or_else(|| json.get("tools"))
        .and_then(|t| t.as_array())
        .ok_or_else(|| {
            AppError::ToolSourceError(
                "Expected 'result.tools', 'tools' or a tools array in MCP payload".into(),
            )
        })
}

/// Transform a single MCP tool object into a ToolDefinition.
fn normalize_tool(tool_value: &Value, server_name: &str) -> AtomizerResult<ToolDefinition> {
    let name = tool_value
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            AppError::ToolSourceError(format!(
                "Tool missing required 'name' field: {:?}",
                tool_value.get("name")
            ))
        })?;

    // Description is optional; null and missing both become empty
    let description = tool_value
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    // MCP uses `inputSchema`; some servers still emit `parameters`
    let parameters = tool_value
        .get("inputSchema")
        .or_else(|| tool_value.get("parameters"))
        .filter(|schema| schema.is_object())
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    Ok(ToolDefinition::new(
        name,
        description,
        parameters,
        server_name,
    ))
}
