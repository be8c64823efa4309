//! Block handler trait and output types.

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::Resolver;
use crate::error::BlockError;
use crate::workflow::{BlockConfig, BlockKind};

/// Result of a handler run.
pub type HandlerResult = std::result::Result<BlockOutput, BlockError>;

/// Output of a block.
#[derive(Debug, Clone)]
pub struct BlockOutput {
    /// Stored in the context under the block id
    pub data: Value,
    /// Timing and debug info; logged, never stored
    pub metadata: Value,
}

impl BlockOutput {
    /// Create a new output with just data.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            metadata: serde_json::json!({}),
        }
    }

    /// Create an output with data and metadata.
    pub fn with_metadata(data: Value, metadata: Value) -> Self {
        Self { data, metadata }
    }
}

/// Trait every block kind implements.
///
/// Handlers receive their decoded config and a resolver over the context
/// snapshot of the current level. They never see other blocks' failures.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// Kind this handler serves.
    fn kind(&self) -> BlockKind;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Run the block.
    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult;
}

/// Error for a config variant that does not belong to the handler.
pub(crate) fn config_mismatch(expected: BlockKind, config: &BlockConfig) -> BlockError {
    BlockError::validation(format!(
        "{} handler received a {} config",
        expected,
        config.kind()
    ))
}
