//! Transform block - reshape data with an ordered list of operations.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::types::{config_mismatch, BlockHandler, BlockOutput, HandlerResult};
use crate::engine::path::{get_path, remove_path, set_path};
use crate::engine::{whole_token, Condition, Reference, Resolver, ITEM_ROOT};
use crate::error::{BlockError, BlockErrorKind};
use crate::workflow::config::{TransformConfig, TransformOp};
use crate::workflow::{BlockConfig, BlockKind};

/// Transform block implementation.
pub struct TransformBlock;

impl TransformBlock {
    pub fn new() -> Self {
        Self
    }

    /// Starting data: the referenced output, or the request payload.
    fn input(config: &TransformConfig, resolver: &Resolver<'_>) -> Result<Value, BlockError> {
        let Some(input_ref) = &config.input_ref else {
            return Ok(resolver.context().request_data().clone());
        };

        let reference = whole_token(input_ref)
            .or_else(|| Reference::parse(input_ref))
            .ok_or_else(|| {
                BlockError::transform(format!("'input_ref' {} is not a reference", input_ref))
            })?;

        resolver
            .lookup(&reference)
            .cloned()
            .ok_or_else(|| BlockError::unresolved("input_ref", &[reference.to_string()]))
    }

    /// Apply one operation to `data`.
    fn apply(op: &TransformOp, data: Value, resolver: &Resolver<'_>) -> Result<Value, BlockError> {
        if let TransformOp::FilterArray { field: None, predicate } = op {
            return match data {
                Value::Array(items) => filter_items(items, predicate, resolver).map(Value::Array),
                other => Err(BlockError::transform(format!(
                    "filter_array without 'field' needs an array, got {}",
                    kind_of(&other)
                ))),
            };
        }

        let mut map = match data {
            Value::Object(map) => map,
            other => {
                return Err(BlockError::transform(format!(
                    "{} needs an object, got {}",
                    op.name(),
                    kind_of(&other)
                )))
            }
        };

        match op {
            TransformOp::Rename { from, to } => {
                let value = remove_path(&mut map, from).ok_or_else(|| {
                    BlockError::transform(format!("rename: field '{}' does not exist", from))
                })?;
                set_path(&mut map, to, value);
            }
            TransformOp::Pick { fields } => {
                let source = Value::Object(map);
                let mut picked = Map::new();
                for field in fields {
                    if let Some(value) = get_path(&source, field) {
                        set_path(&mut picked, field, value.clone());
                    }
                }
                map = picked;
            }
            TransformOp::Set { field, value } => {
                let value = resolver.resolve(value).require("set.value")?;
                set_path(&mut map, field, value);
            }
            TransformOp::Delete { field } => {
                remove_path(&mut map, field);
            }
            TransformOp::Merge { with } => {
                let Value::Object(extra) = resolver.resolve(with).require("merge.with")? else {
                    return Err(BlockError::transform("merge: 'with' must resolve to an object"));
                };
                map.extend(extra);
            }
            TransformOp::FilterArray {
                field: Some(field),
                predicate,
            } => {
                let items = match get_field(&map, field) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(other) => {
                        return Err(BlockError::transform(format!(
                            "filter_array: '{}' is {}, not an array",
                            field,
                            kind_of(other)
                        )))
                    }
                    None => {
                        return Err(BlockError::transform(format!(
                            "filter_array: field '{}' does not exist",
                            field
                        )))
                    }
                };
                let kept = filter_items(items, predicate, resolver)?;
                set_path(&mut map, field, Value::Array(kept));
            }
            TransformOp::FilterArray { field: None, .. } => {}
            TransformOp::Template { field, value } => {
                let rendered = resolver.render_text(value);
                if !rendered.is_complete() {
                    debug!(field = %field, references = ?rendered.references(), "Template rendered with blanks");
                }
                set_path(&mut map, field, rendered.value);
            }
        }

        Ok(Value::Object(map))
    }
}

impl Default for TransformBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the elements for which `predicate` holds, with `item` bound to each.
/// An element whose own fields are missing does not match; a missing
/// reference outside `item` fails.
fn filter_items(
    items: Vec<Value>,
    predicate: &str,
    resolver: &Resolver<'_>,
) -> Result<Vec<Value>, BlockError> {
    let condition = Condition::parse(predicate)?;
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        let keep = {
            let scoped = resolver.with_item(&item);
            let (left, right) = condition.operands(&scoped);
            let missing: Vec<_> = left.unresolved.iter().chain(&right.unresolved).collect();
            if missing.is_empty() {
                condition.holds(&left.value, &right.value)
            } else if missing.iter().all(|u| u.root() == ITEM_ROOT) {
                false
            } else {
                let references: Vec<String> =
                    missing.iter().map(|u| u.reference.clone()).collect();
                return Err(BlockError::unresolved("filter_array.predicate", &references));
            }
        };
        if keep {
            kept.push(item);
        }
    }
    Ok(kept)
}

fn get_field<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (first, rest) = path.split_once('.').unwrap_or((path, ""));
    get_path(map.get(first)?, rest)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl BlockHandler for TransformBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Transform
    }

    fn description(&self) -> &str {
        "Rename, pick, set, delete, merge and filter fields"
    }

    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let BlockConfig::Transform(config) = config else {
            return Err(config_mismatch(self.kind(), config));
        };

        let mut data = Self::input(config, resolver)?;
        for (index, op) in config.operations.iter().enumerate() {
            data = Self::apply(op, data, resolver).map_err(|e| match e.kind {
                BlockErrorKind::Transform => {
                    BlockError::transform(format!("operation {}: {}", index, e.message))
                }
                _ => e,
            })?;
        }

        Ok(BlockOutput::with_metadata(
            data,
            json!({ "operations": config.operations.len() }),
        ))
    }
}
