//! Workflow document parser (JSON or YAML).

use std::path::Path;

use super::types::Workflow;
use crate::error::{EngineError, Result};

/// Parse a workflow from a YAML string.
pub fn parse_workflow(yaml: &str) -> Result<Workflow> {
    if yaml.trim().is_empty() {
        return Err(EngineError::Parse("Empty workflow definition".to_string()));
    }

    let workflow: Workflow = serde_yaml::from_str(yaml).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            EngineError::Parse(format!("Missing required field: {}", field))
        } else {
            EngineError::Parse(format!("Invalid YAML: {}", msg))
        }
    })?;
    Ok(workflow)
}

/// Parse a workflow from a JSON string.
pub fn parse_workflow_json(json: &str) -> Result<Workflow> {
    if json.trim().is_empty() {
        return Err(EngineError::Parse("Empty workflow definition".to_string()));
    }

    serde_json::from_str(json).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            EngineError::Parse(format!("Missing required field: {}", field))
        } else {
            EngineError::Parse(format!("Invalid JSON: {}", msg))
        }
    })
}

/// Parse a workflow from a file path. `.json` files are read as JSON,
/// everything else as YAML.
pub fn parse_workflow_file(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_workflow_json(&content)
    } else {
        parse_workflow(&content)
    }
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}
