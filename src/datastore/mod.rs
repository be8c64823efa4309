//! Document datastore used by `datastore_query` blocks.
//!
//! Documents are JSON objects grouped in named collections. Each document
//! carries a string `_id`. Two backends are provided:
//! - [`MemoryDatastore`]: process-local, for tests and one-off runs
//! - [`SqliteDatastore`]: pooled SQLite file

mod filter;
mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::DatastoreSettings;

pub use filter::{apply_set, matches, prepare_insert, validate_filter};
pub use memory::MemoryDatastore;
pub use sqlite::SqliteDatastore;

/// Result type alias for datastore operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Datastore failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid request: {0}")]
    Rejected(String),

    #[error("document '{0}' already exists")]
    DuplicateId(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("datastore task failed: {0}")]
    Task(String),
}

/// Counts reported by an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// A document store.
///
/// Filters use a small query language: `{field: value}` equality (dotted
/// paths allowed), per-field operators `$eq $ne $gt $gte $lt $lte $in $nin
/// $exists`, and top-level `$and` / `$or`. Unknown operators are rejected.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &str;

    /// Matching documents in insertion order, at most `limit`.
    async fn find(&self, collection: &str, filter: &Value, limit: usize)
        -> StoreResult<Vec<Value>>;

    /// First matching document.
    async fn find_one(&self, collection: &str, filter: &Value) -> StoreResult<Option<Value>> {
        Ok(self.find(collection, filter, 1).await?.into_iter().next())
    }

    /// Store a document and return its `_id`. A missing `_id` is generated.
    async fn insert(&self, collection: &str, document: Value) -> StoreResult<String>;

    /// Apply `changes` (`$set` semantics) to every matching document.
    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        changes: &Value,
    ) -> StoreResult<UpdateOutcome>;

    /// Remove every matching document and return how many went.
    async fn delete(&self, collection: &str, filter: &Value) -> StoreResult<u64>;

    /// Insert many documents.
    async fn seed(&self, collection: &str, documents: Vec<Value>) -> StoreResult<usize> {
        let count = documents.len();
        for document in documents {
            self.insert(collection, document).await?;
        }
        Ok(count)
    }
}

/// Open the backend selected by `settings`: SQLite when a path is set,
/// memory otherwise.
pub fn open(settings: &DatastoreSettings) -> StoreResult<Arc<dyn Datastore>> {
    match &settings.path {
        Some(path) => Ok(Arc::new(SqliteDatastore::open(path, settings)?)),
        None => Ok(Arc::new(MemoryDatastore::new())),
    }
}
