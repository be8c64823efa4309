//! SQLite datastore with r2d2 connection pooling.
//!
//! Documents live in one table keyed by `(collection, id)` with the JSON body
//! as text. Filters are evaluated in Rust over the collection's rows, in
//! insertion order. Blocking SQLite work runs on the blocking thread pool.

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::filter::{apply_set, matches, prepare_insert, validate_filter};
use super::{Datastore, StoreError, StoreResult, UpdateOutcome};
use crate::config::DatastoreSettings;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        UNIQUE (collection, id)
    );
    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection, seq);
"#;

/// Pooled SQLite document store.
#[derive(Clone)]
pub struct SqliteDatastore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDatastore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path, settings: &DatastoreSettings) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA busy_timeout = 5000;
                PRAGMA synchronous = NORMAL;
                "#,
            )
        });

        let pool = Pool::builder()
            .max_size(settings.pool_size.max(1))
            .connection_timeout(Duration::from_secs(settings.pool_timeout_seconds))
            .build(manager)?;

        let store = Self { pool };
        store.pool.get()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    /// Open a private in-memory database (for testing).
    ///
    /// Every pooled connection to `:memory:` is its own database, so the pool
    /// holds exactly one.
    pub fn open_in_memory() -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        let store = Self { pool };
        store.pool.get()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Rows of a collection as `(seq, document)`, in insertion order.
fn load(conn: &Connection, collection: &str) -> StoreResult<Vec<(i64, Value)>> {
    let mut stmt =
        conn.prepare("SELECT seq, body FROM documents WHERE collection = ?1 ORDER BY seq")?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut documents = Vec::new();
    for row in rows {
        let (seq, body) = row?;
        documents.push((seq, serde_json::from_str(&body)?));
    }
    Ok(documents)
}

#[async_trait]
impl Datastore for SqliteDatastore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        limit: usize,
    ) -> StoreResult<Vec<Value>> {
        validate_filter(filter)?;
        let collection = collection.to_string();
        let filter = filter.clone();
        self.with_connection(move |conn| {
            let mut found = Vec::new();
            for (_, document) in load(conn, &collection)? {
                if found.len() >= limit {
                    break;
                }
                if matches(&document, &filter)? {
                    found.push(document);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn insert(&self, collection: &str, document: Value) -> StoreResult<String> {
        let (id, document) = prepare_insert(document)?;
        let collection = collection.to_string();
        self.with_connection(move |conn| {
            let body = serde_json::to_string(&document)?;
            match conn.execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                params![collection, id, body],
            ) {
                Ok(_) => Ok(id),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateId(id))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        changes: &Value,
    ) -> StoreResult<UpdateOutcome> {
        validate_filter(filter)?;
        let collection = collection.to_string();
        let filter = filter.clone();
        let changes = changes.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut outcome = UpdateOutcome::default();
            for (seq, mut document) in load(&tx, &collection)? {
                if !matches(&document, &filter)? {
                    continue;
                }
                outcome.matched += 1;
                if apply_set(&mut document, &changes)? {
                    outcome.modified += 1;
                    tx.execute(
                        "UPDATE documents SET body = ?1 WHERE seq = ?2",
                        params![serde_json::to_string(&document)?, seq],
                    )?;
                }
            }
            // an early return above drops tx, which rolls back
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn delete(&self, collection: &str, filter: &Value) -> StoreResult<u64> {
        validate_filter(filter)?;
        let collection = collection.to_string();
        let filter = filter.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for (seq, document) in load(&tx, &collection)? {
                if matches(&document, &filter)? {
                    deleted += tx.execute("DELETE FROM documents WHERE seq = ?1", params![seq])?
                        as u64;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}
