//! Respond block - build the response envelope.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::types::{config_mismatch, BlockHandler, BlockOutput, HandlerResult};
use crate::engine::{value_to_text, Resolver};
use crate::workflow::{BlockConfig, BlockKind};

/// Respond block implementation.
///
/// Always succeeds: unresolved body references become null, headers whose
/// value cannot be resolved are left out.
pub struct RespondBlock;

impl RespondBlock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RespondBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockHandler for RespondBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Respond
    }

    fn description(&self) -> &str {
        "Produce the final response"
    }

    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let BlockConfig::Respond(config) = config else {
            return Err(config_mismatch(self.kind(), config));
        };

        let body = resolver.resolve(&config.body);
        let unresolved = body.unresolved.len();

        let mut headers = Map::new();
        if let Some(Value::Object(resolved)) = resolver.resolve(&config.headers).optional() {
            for (name, value) in resolved {
                headers.insert(name, Value::String(value_to_text(&value)));
            }
        }

        Ok(BlockOutput::with_metadata(
            json!({
                "status_code": config.status_code,
                "headers": headers,
                "body": body.value,
            }),
            json!({ "unresolved": unresolved }),
        ))
    }
}
