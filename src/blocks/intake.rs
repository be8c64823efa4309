//! Intake block - validates the request payload against a schema.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{config_mismatch, BlockHandler, BlockOutput, HandlerResult};
use crate::engine::Resolver;
use crate::error::BlockError;
use crate::workflow::config::IntakeConfig;
use crate::workflow::{BlockConfig, BlockKind};

/// Intake block implementation.
pub struct IntakeBlock;

impl IntakeBlock {
    pub fn new() -> Self {
        Self
    }

    /// Check `payload` against the schema and return it with defaults filled
    /// in. Every violation is reported at once.
    pub fn validate(config: &IntakeConfig, payload: &Value) -> Result<Value, BlockError> {
        let mut output = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Default::default(),
            other => {
                return Err(BlockError::validation(format!(
                    "request payload must be an object, got {}",
                    type_name(other)
                )))
            }
        };

        let mut violations = Vec::new();
        for field in &config.schema {
            match output.get(&field.name) {
                // explicit null counts as a value that fails the type check
                Some(value) => {
                    if !field.field_type.matches(value) {
                        violations.push(format!(
                            "'{}' must be {}, got {}",
                            field.name,
                            field.field_type.as_str(),
                            type_name(value)
                        ));
                    }
                }
                None => {
                    if let Some(default) = &field.default {
                        output.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        violations.push(format!("'{}' is required", field.name));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(Value::Object(output))
        } else {
            Err(BlockError::validation(format!(
                "invalid request payload: {}",
                violations.join("; ")
            )))
        }
    }
}

impl Default for IntakeBlock {
    fn default() -> Self {
        Self::new()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl BlockHandler for IntakeBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Intake
    }

    fn description(&self) -> &str {
        "Validate the request payload and expose it to later blocks"
    }

    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let BlockConfig::Intake(config) = config else {
            return Err(config_mismatch(self.kind(), config));
        };

        let payload = Self::validate(config, resolver.context().request_data())?;

        Ok(BlockOutput::with_metadata(
            payload,
            json!({ "fields_checked": config.schema.len() }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionContext;
    use crate::error::BlockErrorKind;
    use std::collections::HashMap;

    fn config(schema: Value) -> BlockConfig {
        BlockConfig::decode(BlockKind::Intake, &json!({ "schema": schema })).unwrap()
    }

    async fn run(config: &BlockConfig, payload: Value) -> HandlerResult {
        let ctx = ExecutionContext::new(payload, &HashMap::new());
        IntakeBlock::new().execute(config, &Resolver::new(&ctx)).await
    }

    #[tokio::test]
    async fn test_valid_payload_passes_through() {
        let config = config(json!([
            {"name": "email", "type": "string"},
            {"name": "age", "type": "number"}
        ]));
        let out = run(&config, json!({"email": "a@b.c", "age": 30, "extra": true}))
            .await
            .unwrap();
        assert_eq!(out.data, json!({"email": "a@b.c", "age": 30, "extra": true}));
    }

    #[tokio::test]
    async fn test_all_violations_reported() {
        let config = config(json!([
            {"name": "email", "type": "string"},
            {"name": "age", "type": "number"},
            {"name": "tags", "type": "array"}
        ]));
        let err = run(&config, json!({"age": "thirty", "tags": []}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, BlockErrorKind::Validation);
        assert!(err.message.contains("'email' is required"));
        assert!(err.message.contains("'age' must be number, got string"));
        assert!(!err.message.contains("tags"));
    }

    #[tokio::test]
    async fn test_optional_and_defaults() {
        let config = config(json!([
            {"name": "nickname", "type": "string", "required": false},
            {"name": "page", "type": "number", "required": false, "default": 1}
        ]));
        let out = run(&config, Value::Null).await.unwrap();
        assert_eq!(out.data, json!({"page": 1}));
    }

    #[tokio::test]
    async fn test_empty_schema_accepts_anything() {
        let config = BlockConfig::decode(BlockKind::Intake, &json!({})).unwrap();
        let out = run(&config, json!({"anything": [1, 2]})).await.unwrap();
        assert_eq!(out.data["anything"], json!([1, 2]));
    }
}
