//! Workflow type definitions.
//!
//! A workflow is the persisted graph document: blocks, directed connections
//! between them, and a lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root names the resolver reserves. Block ids may not use them.
pub const RESERVED_ROOTS: [&str; 3] = ["request_data", "request_headers", "item"];

/// A complete workflow definition.
///
/// # Example YAML
///
/// ```yaml
/// name: list-users
/// status: deployed
///
/// blocks:
///   - id: in
///     kind: intake
///   - id: db
///     kind: datastore_query
///     config:
///       collection: users
///       query: { active: true }
///   - id: out
///     kind: respond
///     config:
///       body: { data: "{{db.results}}" }
///
/// connections:
///   - { source_block_id: in, target_block_id: db }
///   - { source_block_id: db, target_block_id: out }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name (used as identifier)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Blocks, in declaration order
    #[serde(default)]
    pub blocks: Vec<Block>,

    /// Directed edges between blocks
    #[serde(default)]
    pub connections: Vec<Connection>,

    /// Lifecycle status
    #[serde(default)]
    pub status: WorkflowStatus,
}

impl Workflow {
    /// Only deployed workflows should be served.
    pub fn is_deployed(&self) -> bool {
        self.status == WorkflowStatus::Deployed
    }

    /// Ids of the blocks feeding `id`.
    pub fn upstream_of(&self, id: &str) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|c| c.target_block_id == id)
            .map(|c| c.source_block_id.as_str())
            .collect()
    }

    /// Ids of the blocks `id` feeds.
    pub fn downstream_of(&self, id: &str) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|c| c.source_block_id == id)
            .map(|c| c.target_block_id.as_str())
            .collect()
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Deployed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Draft => write!(f, "draft"),
            WorkflowStatus::Deployed => write!(f, "deployed"),
        }
    }
}

/// A block (step) in the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Unique block ID within this workflow
    pub id: String,

    /// Block kind
    #[serde(alias = "type")]
    pub kind: BlockKind,

    /// Display label (editor only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Canvas position (editor only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<serde_json::Value>,

    /// Kind-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind, config: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind,
            label: None,
            position: None,
            config,
        }
    }
}

/// The closed set of block kinds.
///
/// Legacy editor names are accepted when reading documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    #[serde(alias = "input")]
    Intake,
    #[serde(alias = "db_query")]
    DatastoreQuery,
    #[serde(alias = "api_call")]
    OutboundCall,
    #[serde(alias = "logic")]
    Conditional,
    Transform,
    #[serde(alias = "output")]
    Respond,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Intake => "intake",
            BlockKind::DatastoreQuery => "datastore_query",
            BlockKind::OutboundCall => "outbound_call",
            BlockKind::Conditional => "conditional",
            BlockKind::Transform => "transform",
            BlockKind::Respond => "respond",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge: `source` must complete before `target` starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(alias = "source")]
    pub source_block_id: String,

    #[serde(alias = "target")]
    pub target_block_id: String,

    /// Editor port names (display only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source_block_id: source.into(),
            target_block_id: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }
}
