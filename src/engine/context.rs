//! Per-invocation execution context.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::workflow::RESERVED_ROOTS;

/// Request data plus the output of every block completed so far.
///
/// Outputs are written once. The orchestrator shares a snapshot with all
/// blocks of a level and records their outputs after the level finishes.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    request_data: Value,
    request_headers: Value,
    outputs: HashMap<String, Value>,
}

impl ExecutionContext {
    /// A null payload is treated as `{}`. Header names are lower-cased.
    pub fn new(request_data: Value, request_headers: &HashMap<String, String>) -> Self {
        let request_data = if request_data.is_null() {
            Value::Object(Map::new())
        } else {
            request_data
        };
        let request_headers = request_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), Value::String(v.clone())))
            .collect::<Map<_, _>>();

        Self {
            request_data,
            request_headers: Value::Object(request_headers),
            outputs: HashMap::new(),
        }
    }

    pub fn request_data(&self) -> &Value {
        &self.request_data
    }

    pub fn request_headers(&self) -> &Value {
        &self.request_headers
    }

    /// Output of a completed block.
    pub fn output(&self, block_id: &str) -> Option<&Value> {
        self.outputs.get(block_id)
    }

    /// Record a block's output. Each block id can be written once.
    pub fn insert(&mut self, block_id: &str, output: Value) -> Result<()> {
        if RESERVED_ROOTS.contains(&block_id) {
            return Err(EngineError::Internal(format!(
                "'{}' is a reserved context key",
                block_id
            )));
        }
        if self.outputs.contains_key(block_id) {
            return Err(EngineError::Internal(format!(
                "output of block '{}' was already recorded",
                block_id
            )));
        }
        self.outputs.insert(block_id.to_string(), output);
        Ok(())
    }

    /// Look up a reference root. `item` is not stored here; the resolver
    /// binds it.
    pub fn root(&self, name: &str) -> Option<&Value> {
        match name {
            "request_data" => Some(&self.request_data),
            "request_headers" => Some(&self.request_headers),
            _ => self.outputs.get(name),
        }
    }
}
