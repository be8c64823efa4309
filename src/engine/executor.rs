//! Orchestrator - runs a compiled workflow level by level.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn, Span};

use super::context::ExecutionContext;
use super::resolver::Resolver;
use crate::blocks::{BlockHandler, HandlerRegistry, HandlerResult};
use crate::config::{Config, EngineSettings};
use crate::datastore::{self, Datastore};
use crate::error::{BlockError, EngineError, Result};
use crate::metrics;
use crate::workflow::{compile, BlockConfig, BlockKind, CompiledWorkflow, PlanCache, Workflow};

/// Final response of an invocation, taken from the respond block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl EngineResponse {
    fn from_output(output: &Value) -> Self {
        let status_code = output
            .get("status_code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(200);

        let headers = output
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), super::value_to_text(v)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            status_code,
            headers,
            body: output.get("body").cloned().unwrap_or(Value::Null),
        }
    }
}

/// Workflow execution engine.
///
/// Each invocation gets its own context; the registry, datastore and HTTP
/// client behind the handlers are shared.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    settings: EngineSettings,
    cache: Option<PlanCache>,
}

impl Engine {
    /// Create an engine with default settings.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_settings(registry, EngineSettings::default())
    }

    pub fn with_settings(registry: HandlerRegistry, settings: EngineSettings) -> Self {
        let cache = (settings.plan_cache_capacity > 0)
            .then(|| PlanCache::with_capacity(settings.plan_cache_capacity));
        Self {
            registry: Arc::new(registry),
            settings,
            cache,
        }
    }

    /// Build the engine and its datastore from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let datastore = datastore::open(&config.datastore)
            .map_err(|e| EngineError::Config(format!("failed to open datastore: {}", e)))?;
        Self::with_datastore(datastore, config)
    }

    /// Build the engine around an existing datastore.
    pub fn with_datastore(datastore: Arc<dyn Datastore>, config: &Config) -> Result<Self> {
        let registry = HandlerRegistry::new(datastore, config)?;
        Ok(Self::with_settings(registry, config.engine.clone()))
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Plan (or fetch the cached plan for) `workflow` and run it.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        request_data: Value,
        request_headers: &HashMap<String, String>,
    ) -> Result<EngineResponse> {
        let compiled = match &self.cache {
            Some(cache) => cache.get_or_compile(workflow).await?,
            None => Arc::new(compile(workflow)?),
        };
        self.execute_compiled(compiled, request_data, request_headers)
            .await
    }

    /// Run an already compiled workflow.
    #[instrument(
        name = "workflow.execute",
        skip_all,
        fields(
            workflow = %compiled.name,
            execution_id = tracing::field::Empty,
        )
    )]
    pub async fn execute_compiled(
        &self,
        compiled: Arc<CompiledWorkflow>,
        request_data: Value,
        request_headers: &HashMap<String, String>,
    ) -> Result<EngineResponse> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("execution_id", execution_id.as_str());

        info!(
            levels = compiled.plan.len(),
            blocks = compiled.block_count(),
            "Starting execution {} of workflow '{}'",
            execution_id,
            compiled.name
        );

        let _active = metrics::ActiveExecutionGuard::start();
        let start = Instant::now();

        let ctx = ExecutionContext::new(request_data, request_headers);
        let result = self.run_levels(&compiled, ctx, &execution_id).await;

        metrics::record_workflow_duration(start.elapsed(), &compiled.name);

        match &result {
            Ok(response) => {
                metrics::record_workflow_execution("completed");
                info!(
                    status_code = response.status_code,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Execution {} completed",
                    execution_id
                );
            }
            Err(e) => {
                metrics::record_workflow_execution("failed");
                error!(
                    code = e.code(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Execution {} failed: {}",
                    execution_id,
                    e
                );
            }
        }

        result
    }

    async fn run_levels(
        &self,
        compiled: &Arc<CompiledWorkflow>,
        ctx: ExecutionContext,
        execution_id: &str,
    ) -> Result<EngineResponse> {
        let mut ctx = Arc::new(ctx);

        for (index, level) in compiled.plan.levels().iter().enumerate() {
            debug!(level = index, blocks = ?level, "Dispatching level");

            let outputs = self
                .run_level(compiled, level, &ctx, execution_id)
                .await?;

            // every task has finished, so this does not clone
            let context = Arc::make_mut(&mut ctx);
            for (block_id, output) in outputs {
                context.insert(&block_id, output)?;
            }
        }

        let respond_id = compiled.respond_block();
        let output = ctx.output(respond_id).ok_or_else(|| {
            EngineError::Internal(format!("respond block '{}' produced no output", respond_id))
        })?;
        Ok(EngineResponse::from_output(output))
    }

    /// Run one level with at most `max_concurrency` blocks in flight. The
    /// whole level is joined; the first failure in level order wins and the
    /// other results are discarded.
    async fn run_level(
        &self,
        compiled: &Arc<CompiledWorkflow>,
        level: &[String],
        ctx: &Arc<ExecutionContext>,
        execution_id: &str,
    ) -> Result<Vec<(String, Value)>> {
        let mut pending = Vec::with_capacity(level.len());
        for block_id in level {
            let block = compiled.block(block_id).ok_or_else(|| {
                EngineError::Internal(format!("planned block '{}' was not compiled", block_id))
            })?;
            let handler = self.registry.get(block.kind).ok_or_else(|| {
                EngineError::block(
                    block_id,
                    block.kind,
                    BlockError::validation(format!("no handler registered for {}", block.kind)),
                )
            })?;
            pending.push((block_id.clone(), block.kind, handler));
        }

        let max_concurrency = self.settings.max_concurrency.max(1);
        let limit = self.settings.block_timeout();
        let mut results: Vec<Option<HandlerResult>> = level.iter().map(|_| None).collect();
        let mut join_set: JoinSet<(usize, HandlerResult)> = JoinSet::new();
        let mut queue = pending.into_iter().enumerate();
        let mut failed = false;

        loop {
            while !failed && join_set.len() < max_concurrency {
                let Some((index, (block_id, kind, handler))) = queue.next() else {
                    break;
                };
                let compiled = Arc::clone(compiled);
                let ctx = Arc::clone(ctx);
                let execution_id = execution_id.to_string();

                join_set.spawn(async move {
                    let result = match compiled.block(&block_id) {
                        Some(block) => {
                            run_block(
                                handler,
                                &block_id,
                                kind,
                                &block.config,
                                &ctx,
                                limit,
                                &execution_id,
                            )
                            .await
                        }
                        None => Err(BlockError::validation("block disappeared from the plan")),
                    };
                    (index, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (index, result) =
                joined.map_err(|e| EngineError::Internal(format!("block task failed: {}", e)))?;
            if result.is_err() && !failed {
                failed = true;
                debug!("Level failed, not starting remaining blocks");
            }
            results[index] = Some(result);
        }

        let mut outputs = Vec::with_capacity(level.len());
        for (block_id, result) in level.iter().zip(results) {
            let kind = compiled
                .block(block_id)
                .map(|b| b.kind)
                .unwrap_or(BlockKind::Respond);
            match result {
                Some(Ok(output)) => outputs.push((block_id.clone(), output.data)),
                Some(Err(e)) => return Err(EngineError::block(block_id, kind, e)),
                // not started because an earlier block failed
                None => {}
            }
        }

        if outputs.len() != level.len() {
            return Err(EngineError::Internal(
                "level halted without a recorded failure".to_string(),
            ));
        }
        Ok(outputs)
    }
}

#[instrument(
    name = "block.execute",
    skip_all,
    fields(
        block_id = %block_id,
        block_kind = %kind,
        execution_id = %execution_id,
    )
)]
async fn run_block(
    handler: Arc<dyn BlockHandler>,
    block_id: &str,
    kind: BlockKind,
    config: &BlockConfig,
    ctx: &ExecutionContext,
    limit: Duration,
    execution_id: &str,
) -> HandlerResult {
    let start = Instant::now();
    let resolver = Resolver::new(ctx);

    let outcome = timeout(limit, handler.execute(config, &resolver)).await;
    metrics::record_block_duration(start.elapsed(), kind.as_str());

    match outcome {
        Ok(Ok(output)) => {
            metrics::record_block_execution(kind.as_str(), "success");
            info!(
                duration_ms = start.elapsed().as_millis() as u64,
                metadata = %output.metadata,
                "Block '{}' completed",
                block_id
            );
            Ok(output)
        }
        Ok(Err(e)) => {
            metrics::record_block_execution(kind.as_str(), "failed");
            error!(code = e.kind.code(), "Block '{}' failed: {}", block_id, e);
            Err(e)
        }
        Err(_) => {
            metrics::record_block_execution(kind.as_str(), "timeout");
            warn!("Block '{}' timed out after {}s", block_id, limit.as_secs());
            Err(BlockError::timeout(limit.as_secs()))
        }
    }
}
