//! Workflow definition, parsing, planning and compilation.
//!
//! A workflow consists of:
//! - Blocks: typed steps with kind-specific config
//! - Connections: directed edges ordering the blocks
//! - Status: draft or deployed

mod cache;
mod compile;
pub mod config;
mod parser;
mod plan;
mod types;

pub use cache::PlanCache;
pub use compile::{compile, CompiledBlock, CompiledWorkflow};
pub use config::BlockConfig;
pub use parser::{parse_workflow, parse_workflow_file, parse_workflow_json};
pub use plan::{plan, ExecutionPlan};
pub use types::*;
