//! In-process datastore.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::filter::{apply_set, matches, prepare_insert, validate_filter};
use super::{Datastore, StoreError, StoreResult, UpdateOutcome};

/// Collections held in memory, documents in insertion order.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        limit: usize,
    ) -> StoreResult<Vec<Value>> {
        validate_filter(filter)?;
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for document in documents {
            if found.len() >= limit {
                break;
            }
            if matches(document, filter)? {
                found.push(document.clone());
            }
        }
        Ok(found)
    }

    async fn insert(&self, collection: &str, document: Value) -> StoreResult<String> {
        let (id, document) = prepare_insert(document)?;
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|d| d["_id"] == Value::String(id.clone())) {
            return Err(StoreError::DuplicateId(id));
        }
        documents.push(document);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        changes: &Value,
    ) -> StoreResult<UpdateOutcome> {
        validate_filter(filter)?;
        let mut collections = self.collections.write().await;
        let mut outcome = UpdateOutcome::default();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(outcome);
        };

        // stage changes so a rejected update leaves the collection untouched
        let mut staged = documents.clone();
        for document in staged.iter_mut() {
            if matches(document, filter)? {
                outcome.matched += 1;
                if apply_set(document, changes)? {
                    outcome.modified += 1;
                }
            }
        }
        *documents = staged;
        Ok(outcome)
    }

    async fn delete(&self, collection: &str, filter: &Value) -> StoreResult<u64> {
        validate_filter(filter)?;
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        // match everything first so a rejected filter drops nothing
        let doomed = documents
            .iter()
            .map(|d| matches(d, filter))
            .collect::<StoreResult<Vec<bool>>>()?;
        let before = documents.len();
        let mut doomed = doomed.into_iter();
        documents.retain(|_| !doomed.next().unwrap_or(false));
        Ok((before - documents.len()) as u64)
    }
}
