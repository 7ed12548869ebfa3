//! Deterministic text rendering of a tool definition.
//!
//! The descriptor text is both the embedding input and the basis for change
//! detection, so the same definition must always render to the same bytes.
//! Parameters are emitted in lexicographic order regardless of how the
//! schema object was built.

use crate::ingestion::types::ToolDefinition;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Maximum parameter description length in the summary
const MAX_PARAM_DESC_LENGTH: usize = 50;

/// Render the descriptor text for a tool.
///
/// Format: "TOOL: <name> | CONTEXT: <origin> | FUNC: <description> | INPUTS: <param_summary>"
pub fn descriptor_text(tool: &ToolDefinition) -> String {
    let params = build_param_summary(&tool.parameters);
    format!(
        "TOOL: {} | CONTEXT: {} | FUNC: {} | INPUTS: {}",
        tool.name,
        tool.origin,
        tool.description.trim(),
        params
    )
}

/// Build parameter summary from a JSON schema's `properties`.
///
/// Format: "param1*: type (desc), param2: type"
/// Required parameters are marked with an asterisk (*).
fn build_param_summary(schema: &Value) -> String {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return "none".to_string();
    };

    if properties.is_empty() {
        return "none".to_string();
    }

    let required: HashSet<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let sorted: BTreeMap<&str, &Value> = properties
        .iter()
        .map(|(name, prop)| (name.as_str(), prop))
        .collect();

    let params: Vec<String> = sorted
        .into_iter()
        .map(|(name, prop)| format_param(name, prop, required.contains(name)))
        .collect();

    params.join(", ")
}

/// Format a single parameter for the summary.
fn format_param(name: &str, prop: &Value, is_required: bool) -> String {
    let param_type = match prop.get("type") {
        Some(Value::String(t)) => t.clone(),
        // Union types such as ["string", "null"]
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join("|"),
        _ => "any".to_string(),
    };

    let brief_desc = prop
        .get("description")
        .and_then(|d| d.as_str())
        .map(brief)
        .unwrap_or("");

    let req_marker = if is_required { "*" } else { "" };

    if brief_desc.is_empty() {
        format!("{}{}: {}", name, req_marker, param_type)
    } else {
        format!("{}{}: {} ({})", name, req_marker, param_type, brief_desc)
    }
}

/// First sentence of `desc`, capped at MAX_PARAM_DESC_LENGTH characters.
fn brief(desc: &str) -> &str {
    let desc = desc.trim();
    let sentence = desc.find('.').map_or(desc, |end| &desc[..end]);
    match sentence.char_indices().nth(MAX_PARAM_DESC_LENGTH) {
        Some((cut, _)) => &sentence[..cut],
        None => sentence,
    }
}
