//! Error types for blockflow.
//!
//! Errors come in three layers:
//! - [`GraphError`]: the workflow graph or a block config is structurally
//!   invalid. Always raised before any block runs.
//! - [`BlockError`]: a single block failed while executing.
//! - [`EngineError`]: what `execute` hands back to the caller. Wraps the two
//!   above and the loading errors around the engine.
//!
//! Every error carries a stable code that callers can parse.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::BlockKind;

/// Result type alias for blockflow operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Structural failure kinds raised by the planner and compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphErrorKind {
    Cycle,
    DanglingEdge,
    NoResponse,
    SelfLoop,
    DuplicateEdge,
    DuplicateBlockId,
    InvalidConfig,
}

impl GraphErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            GraphErrorKind::Cycle => "GRAPH_CYCLE",
            GraphErrorKind::DanglingEdge => "GRAPH_DANGLING_EDGE",
            GraphErrorKind::NoResponse => "GRAPH_NO_RESPONSE",
            GraphErrorKind::SelfLoop => "GRAPH_SELF_LOOP",
            GraphErrorKind::DuplicateEdge => "GRAPH_DUPLICATE_EDGE",
            GraphErrorKind::DuplicateBlockId => "GRAPH_DUPLICATE_BLOCK_ID",
            GraphErrorKind::InvalidConfig => "GRAPH_INVALID_CONFIG",
        }
    }
}

impl fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphErrorKind::Cycle => "cycle",
            GraphErrorKind::DanglingEdge => "dangling edge",
            GraphErrorKind::NoResponse => "no response block",
            GraphErrorKind::SelfLoop => "self loop",
            GraphErrorKind::DuplicateEdge => "duplicate edge",
            GraphErrorKind::DuplicateBlockId => "duplicate block id",
            GraphErrorKind::InvalidConfig => "invalid block config",
        };
        f.write_str(name)
    }
}

/// The workflow graph cannot be executed as given.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct GraphError {
    pub kind: GraphErrorKind,
    /// Offending block, when one can be named.
    pub block_id: Option<String>,
    pub message: String,
}

impl GraphError {
    pub fn new(kind: GraphErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            block_id: None,
            message: message.into(),
        }
    }

    pub fn at(kind: GraphErrorKind, block_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            block_id: Some(block_id.to_string()),
            message: message.into(),
        }
    }
}

/// Failure kinds a block handler (or the per-block deadline) can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockErrorKind {
    Validation,
    Datastore,
    Network,
    Evaluation,
    Transform,
    UnresolvedReference,
    Timeout,
}

impl BlockErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            BlockErrorKind::Validation => "VALIDATION_ERROR",
            BlockErrorKind::Datastore => "DATASTORE_ERROR",
            BlockErrorKind::Network => "NETWORK_ERROR",
            BlockErrorKind::Evaluation => "EVALUATION_ERROR",
            BlockErrorKind::Transform => "TRANSFORM_ERROR",
            BlockErrorKind::UnresolvedReference => "UNRESOLVED_REFERENCE",
            BlockErrorKind::Timeout => "BLOCK_TIMEOUT",
        }
    }
}

impl fmt::Display for BlockErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockErrorKind::Validation => "validation error",
            BlockErrorKind::Datastore => "datastore error",
            BlockErrorKind::Network => "network error",
            BlockErrorKind::Evaluation => "evaluation error",
            BlockErrorKind::Transform => "transform error",
            BlockErrorKind::UnresolvedReference => "unresolved reference",
            BlockErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// A single block failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct BlockError {
    pub kind: BlockErrorKind,
    pub message: String,
}

impl BlockError {
    pub fn new(kind: BlockErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Validation, message)
    }

    pub fn datastore(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Datastore, message)
    }

    /// Network failures always name the URL that triggered them.
    pub fn network(url: &str, message: impl fmt::Display) -> Self {
        Self::new(BlockErrorKind::Network, format!("{} ({})", message, url))
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Evaluation, message)
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(BlockErrorKind::Transform, message)
    }

    pub fn unresolved(field: &str, references: &[String]) -> Self {
        Self::new(
            BlockErrorKind::UnresolvedReference,
            format!(
                "required field '{}' references unresolved {}",
                field,
                references.join(", ")
            ),
        )
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::new(
            BlockErrorKind::Timeout,
            format!("block did not finish within {}s", seconds),
        )
    }
}

/// Error returned by the engine entry points.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Block '{block_id}' ({block_kind}) failed: {source}")]
    Block {
        block_id: String,
        block_kind: BlockKind,
        #[source]
        source: BlockError,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn block(block_id: &str, block_kind: BlockKind, source: BlockError) -> Self {
        EngineError::Block {
            block_id: block_id.to_string(),
            block_kind,
            source,
        }
    }

    /// Get the error code for programmatic parsing.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Graph(e) => e.kind.code(),
            EngineError::Block { source, .. } => source.kind.code(),
            EngineError::Parse(_) => "PARSE_ERROR",
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
            EngineError::Io(_) => "IO_ERROR",
        }
    }

    /// Offending block id, if the failure can be pinned to one.
    pub fn block_id(&self) -> Option<&str> {
        match self {
            EngineError::Graph(e) => e.block_id.as_deref(),
            EngineError::Block { block_id, .. } => Some(block_id),
            _ => None,
        }
    }

    /// Block failure kind, if this is a block failure.
    pub fn block_error_kind(&self) -> Option<BlockErrorKind> {
        match self {
            EngineError::Block { source, .. } => Some(source.kind),
            _ => None,
        }
    }

    /// Suggested transport status for the HTTP layer in front of the engine.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Block { source, .. } => match source.kind {
                BlockErrorKind::Validation => 400,
                BlockErrorKind::Network => 502,
                BlockErrorKind::Timeout => 504,
                _ => 500,
            },
            EngineError::Parse(_) => 400,
            _ => 500,
        }
    }

    /// Sanitized message safe for external consumers.
    ///
    /// Graph, validation and evaluation messages are author-facing and kept.
    /// Datastore, network and internal details are hidden.
    pub fn external_message(&self) -> String {
        match self {
            EngineError::Graph(e) => format!("Workflow configuration error: {}", e),
            EngineError::Block {
                block_id, source, ..
            } => match source.kind {
                BlockErrorKind::Validation
                | BlockErrorKind::Evaluation
                | BlockErrorKind::Transform
                | BlockErrorKind::UnresolvedReference => {
                    format!("Block '{}' failed: {}", block_id, source)
                }
                BlockErrorKind::Datastore => {
                    format!("Block '{}' failed: a datastore error occurred", block_id)
                }
                BlockErrorKind::Network => {
                    format!("Block '{}' failed: upstream request failed", block_id)
                }
                BlockErrorKind::Timeout => format!("Block '{}' timed out", block_id),
            },
            EngineError::Parse(msg) => format!("Parse error: {}", msg),
            EngineError::Config(_) => "A configuration error occurred".to_string(),
            EngineError::Internal(_) | EngineError::Io(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Sanitized JSON envelope for external consumers.
    pub fn to_external_json(&self) -> serde_json::Value {
        self.envelope(self.external_message())
    }

    /// JSON envelope with the full error message.
    ///
    /// **Warning**: only for internal/debug use.
    pub fn to_json(&self) -> serde_json::Value {
        self.envelope(self.to_string())
    }

    fn envelope(&self, message: String) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code(),
            "message": message,
        });
        if let Some(block_id) = self.block_id() {
            error["block_id"] = serde_json::Value::String(block_id.to_string());
        }
        serde_json::json!({
            "success": false,
            "error": error,
        })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_error_codes_and_status() {
        let err = EngineError::block(
            "call",
            BlockKind::OutboundCall,
            BlockError::network("http://example.invalid", "connection refused"),
        );
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert_eq!(err.http_status(), 502);
        assert_eq!(err.block_id(), Some("call"));
        assert!(err.to_string().contains("example.invalid"));
    }

    #[test]
    fn test_external_message_hides_datastore_details() {
        let err = EngineError::block(
            "db",
            BlockKind::DatastoreQuery,
            BlockError::datastore("disk I/O error at /var/lib/secret.db"),
        );
        assert!(!err.external_message().contains("secret"));
        assert!(err.to_json()["error"]["message"]
            .as_str()
            .unwrap()
            .contains("secret"));
    }

    #[test]
    fn test_graph_error_envelope() {
        let err: EngineError =
            GraphError::at(GraphErrorKind::Cycle, "a", "blocks form a cycle").into();
        let json = err.to_external_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "GRAPH_CYCLE");
        assert_eq!(json["error"]["block_id"], "a");
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_unresolved_message_lists_references() {
        let err = BlockError::unresolved("query", &["ghost.field".to_string()]);
        assert_eq!(err.kind, BlockErrorKind::UnresolvedReference);
        assert!(err.message.contains("ghost.field"));
    }
}
