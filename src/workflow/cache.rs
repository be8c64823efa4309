//! Compiled plan cache.
//!
//! Caches compiled workflows so repeated invocations of the same graph skip
//! planning and config decoding. Entries are keyed by workflow name and
//! checked against a hash of the graph definition.

use moka::future::Cache;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use super::compile::{compile, CompiledWorkflow};
use super::types::Workflow;
use crate::error::GraphError;

/// Default cache capacity (number of workflows).
const DEFAULT_CACHE_CAPACITY: u64 = 100;

/// Default time-to-idle for cached plans (10 minutes).
const DEFAULT_TTI_SECS: u64 = 600;

#[derive(Clone)]
struct CachedPlan {
    compiled: Arc<CompiledWorkflow>,
    /// Hash of the graph definition for change detection
    definition_hash: u64,
}

/// Plan cache using moka.
#[derive(Clone)]
pub struct PlanCache {
    cache: Cache<Arc<str>, CachedPlan>,
}

impl PlanCache {
    /// Create a new plan cache with default settings.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(Duration::from_secs(DEFAULT_TTI_SECS))
            .build();

        Self { cache }
    }

    /// Get a compiled plan from cache, or compile and cache it.
    ///
    /// Compile failures are not cached.
    pub async fn get_or_compile(
        &self,
        workflow: &Workflow,
    ) -> Result<Arc<CompiledWorkflow>, GraphError> {
        let key: Arc<str> = Arc::from(workflow.name.as_str());
        let definition_hash = hash_definition(workflow);

        if let Some(cached) = self.cache.get(&key).await {
            if cached.definition_hash == definition_hash {
                return Ok(cached.compiled);
            }
            self.cache.invalidate(&key).await;
        }

        let compiled = Arc::new(compile(workflow)?);
        self.cache
            .insert(
                key,
                CachedPlan {
                    compiled: compiled.clone(),
                    definition_hash,
                },
            )
            .await;

        Ok(compiled)
    }

    /// Number of cached plans.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash of everything that affects execution. Labels, positions and status
/// do not.
fn hash_definition(workflow: &Workflow) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for block in &workflow.blocks {
        block.id.hash(&mut hasher);
        block.kind.hash(&mut hasher);
        block.config.to_string().hash(&mut hasher);
    }
    for conn in &workflow.connections {
        conn.source_block_id.hash(&mut hasher);
        conn.target_block_id.hash(&mut hasher);
    }
    hasher.finish()
}
