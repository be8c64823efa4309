//! Metrics for blockflow.
//!
//! Emitted through the `metrics` facade. The library installs no recorder;
//! embedders pick an exporter.
//!
//! ## Metrics
//!
//! ### Counters
//! - `blockflow_workflows_executed_total` - Workflow executions by status
//! - `blockflow_blocks_executed_total` - Block executions by block_kind and status
//! - `blockflow_outbound_requests_total` - Outbound calls by method and status
//! - `blockflow_datastore_operations_total` - Datastore calls by operation and success
//!
//! ### Histograms
//! - `blockflow_workflow_duration_seconds` - Workflow execution duration
//! - `blockflow_block_duration_seconds` - Block execution duration by block_kind
//!
//! ### Gauges
//! - `blockflow_active_executions` - Currently running workflow executions

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Workflow Metrics
// =============================================================================

/// Record a workflow execution.
pub fn record_workflow_execution(status: &str) {
    counter!(
        "blockflow_workflows_executed_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record workflow execution duration.
pub fn record_workflow_duration(duration: Duration, workflow_name: &str) {
    histogram!(
        "blockflow_workflow_duration_seconds",
        "workflow" => workflow_name.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Counts one running execution in `blockflow_active_executions` until
/// dropped, including when the caller abandons the execution future.
pub struct ActiveExecutionGuard(());

impl ActiveExecutionGuard {
    pub fn start() -> Self {
        gauge!("blockflow_active_executions").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveExecutionGuard {
    fn drop(&mut self) {
        gauge!("blockflow_active_executions").decrement(1.0);
    }
}

// =============================================================================
// Block Metrics
// =============================================================================

/// Record a block execution.
pub fn record_block_execution(block_kind: &str, status: &str) {
    counter!(
        "blockflow_blocks_executed_total",
        "block_kind" => block_kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record block execution duration.
pub fn record_block_duration(duration: Duration, block_kind: &str) {
    histogram!(
        "blockflow_block_duration_seconds",
        "block_kind" => block_kind.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Outbound / Datastore Metrics
// =============================================================================

/// Record a request made by an outbound_call block. Status 0 means no response.
pub fn record_outbound_request(method: &str, status_code: u16) {
    counter!(
        "blockflow_outbound_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);
}

/// Record a datastore operation.
pub fn record_datastore_operation(operation: &str, success: bool) {
    counter!(
        "blockflow_datastore_operations_total",
        "operation" => operation.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}
