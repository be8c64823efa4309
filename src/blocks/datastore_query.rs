//! Datastore query block - find, find_one, insert, update or delete.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::types::{config_mismatch, BlockHandler, BlockOutput, HandlerResult};
use crate::datastore::Datastore;
use crate::engine::Resolver;
use crate::error::BlockError;
use crate::workflow::config::{DatastoreOperation, DatastoreQueryConfig};
use crate::workflow::{BlockConfig, BlockKind};

/// Datastore query block implementation.
pub struct DatastoreQueryBlock {
    datastore: Arc<dyn Datastore>,
    default_limit: usize,
    max_limit: usize,
}

impl DatastoreQueryBlock {
    pub fn new(datastore: Arc<dyn Datastore>, default_limit: usize, max_limit: usize) -> Self {
        Self {
            datastore,
            default_limit,
            max_limit: max_limit.max(1),
        }
    }

    fn limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }

    async fn run(&self, config: &DatastoreQueryConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let collection = resolver
            .resolve_str(&config.collection)
            .require_text("collection")?;
        let query = resolver.resolve(&config.query).require("query")?;
        let store = self.datastore.as_ref();
        let fail = |e: crate::datastore::StoreError| {
            crate::metrics::record_datastore_operation(config.operation.as_str(), false);
            BlockError::datastore(format!("{} on '{}': {}", config.operation, collection, e))
        };

        let data = match config.operation {
            DatastoreOperation::Find => {
                let limit = self.limit(config.limit);
                let results = store.find(&collection, &query, limit).await.map_err(fail)?;
                json!({ "count": results.len(), "results": results })
            }
            DatastoreOperation::FindOne => store
                .find_one(&collection, &query)
                .await
                .map_err(fail)?
                .unwrap_or(Value::Null),
            DatastoreOperation::Insert => {
                let document = self.data(config, resolver)?;
                let id = store.insert(&collection, document).await.map_err(fail)?;
                json!({ "inserted_id": id })
            }
            DatastoreOperation::Update => {
                let changes = self.data(config, resolver)?;
                let outcome = store
                    .update(&collection, &query, &changes)
                    .await
                    .map_err(fail)?;
                json!({ "matched_count": outcome.matched, "modified_count": outcome.modified })
            }
            DatastoreOperation::Delete => {
                let deleted = store.delete(&collection, &query).await.map_err(fail)?;
                json!({ "deleted_count": deleted })
            }
        };

        crate::metrics::record_datastore_operation(config.operation.as_str(), true);
        Ok(BlockOutput::new(data))
    }

    fn data(
        &self,
        config: &DatastoreQueryConfig,
        resolver: &Resolver<'_>,
    ) -> Result<Value, BlockError> {
        // presence is checked at compile time
        let data = config.data.as_ref().ok_or_else(|| {
            BlockError::validation(format!("'{}' requires 'data'", config.operation))
        })?;
        resolver.resolve(data).require("data")
    }
}

#[async_trait]
impl BlockHandler for DatastoreQueryBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::DatastoreQuery
    }

    fn description(&self) -> &str {
        "Query or modify a datastore collection"
    }

    async fn execute(&self, config: &BlockConfig, resolver: &Resolver<'_>) -> HandlerResult {
        let BlockConfig::DatastoreQuery(config) = config else {
            return Err(config_mismatch(self.kind(), config));
        };

        let start = Instant::now();
        let mut output = self.run(config, resolver).await?;
        debug!(
            backend = self.datastore.backend(),
            operation = %config.operation,
            collection = %config.collection,
            "Datastore operation finished"
        );
        output.metadata = json!({
            "operation": config.operation.as_str(),
            "backend": self.datastore.backend(),
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        Ok(output)
    }
}
