//! Conditional block - pick one of two values by a comparison.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{config_mismatch, BlockHandler, BlockOutput, HandlerResult};
use crate::engine::{evaluate_condition, Resolver};
use crate::workflow::config::ConditionalConfig;
use crate::workflow::{BlockConfig, BlockKind};

/// Conditional block implementation.
pub struct ConditionalBlock;

impl ConditionalBlock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConditionalBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockHandler for ConditionalBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Conditional
    }

    fn description(&self) -> &str {
        "Compare two values and output the matching branch value"
    }

    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let BlockConfig::Conditional(config) = config else {
            return Err(config_mismatch(self.kind(), config));
        };
        let ConditionalConfig {
            condition,
            true_value,
            false_value,
        } = config;

        let outcome = evaluate_condition(condition, resolver)?;
        let selected = if outcome { true_value } else { false_value };

        // only the selected branch is resolved
        let data = resolver.resolve(selected).optional().unwrap_or(Value::Null);

        Ok(BlockOutput::with_metadata(data, json!({ "branch": outcome })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionContext;
    use crate::error::BlockErrorKind;
    use std::collections::HashMap;

    async fn run(config: Value, payload: Value) -> HandlerResult {
        let config = BlockConfig::decode(BlockKind::Conditional, &config).unwrap();
        let ctx = ExecutionContext::new(payload, &HashMap::new());
        ConditionalBlock::new()
            .execute(&config, &Resolver::new(&ctx))
            .await
    }

    fn adult() -> Value {
        json!({
            "condition": "{{request_data.age}} >= 18",
            "true_value": "adult",
            "false_value": "minor"
        })
    }

    #[tokio::test]
    async fn test_numeric_branches() {
        let out = run(adult(), json!({"age": 20})).await.unwrap();
        assert_eq!(out.data, json!("adult"));
        assert_eq!(out.metadata["branch"], true);

        let out = run(adult(), json!({"age": 10})).await.unwrap();
        assert_eq!(out.data, json!("minor"));
    }

    #[tokio::test]
    async fn test_numeric_text_compares_as_number() {
        let out = run(adult(), json!({"age": "18"})).await.unwrap();
        assert_eq!(out.data, json!("adult"));
    }

    #[tokio::test]
    async fn test_branch_values_are_resolved() {
        let out = run(
            json!({
                "condition": "{{request_data.plan}} == 'pro'",
                "true_value": {"limit": "{{request_data.quota}}", "who": "{{request_data.name}}"},
                "false_value": {"limit": 10}
            }),
            json!({"plan": "pro", "quota": 500, "name": "Ann"}),
        )
        .await
        .unwrap();
        assert_eq!(out.data, json!({"limit": 500, "who": "Ann"}));
    }

    #[tokio::test]
    async fn test_default_values_are_booleans() {
        let out = run(json!({"condition": "1 < 2"}), json!({})).await.unwrap();
        assert_eq!(out.data, json!(true));
    }

    #[tokio::test]
    async fn test_malformed_condition() {
        let err = run(json!({"condition": "{{request_data.age}} >> 18"}), json!({"age": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, BlockErrorKind::Evaluation);
    }

    #[tokio::test]
    async fn test_unresolved_operand() {
        let err = run(json!({"condition": "{{ghost.age}} > 1"}), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, BlockErrorKind::UnresolvedReference);
    }
}
