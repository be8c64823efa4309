//! Compile a workflow document into an executable form.
//!
//! Compilation plans the graph, decodes every block config and picks the
//! terminal respond block. Everything here fails before any block runs.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::config::BlockConfig;
use super::plan::{plan, ExecutionPlan};
use super::types::{BlockKind, Workflow, RESERVED_ROOTS};
use crate::error::{GraphError, GraphErrorKind};

/// A block ready for dispatch.
#[derive(Debug, Clone)]
pub struct CompiledBlock {
    pub id: String,
    pub kind: BlockKind,
    pub config: BlockConfig,
    /// Blocks that must finish first
    pub upstream: Vec<String>,
}

/// A validated, planned workflow.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub name: String,
    pub plan: ExecutionPlan,
    blocks: HashMap<String, CompiledBlock>,
    respond_block: String,
}

impl CompiledWorkflow {
    pub fn block(&self, id: &str) -> Option<&CompiledBlock> {
        self.blocks.get(id)
    }

    /// The respond block whose output becomes the response.
    pub fn respond_block(&self) -> &str {
        &self.respond_block
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Plan and decode a workflow.
///
/// When several respond blocks exist, the one in the latest level answers;
/// ties go to the block declared first.
pub fn compile(workflow: &Workflow) -> Result<CompiledWorkflow, GraphError> {
    for block in &workflow.blocks {
        if RESERVED_ROOTS.contains(&block.id.as_str()) {
            return Err(GraphError::at(
                GraphErrorKind::InvalidConfig,
                &block.id,
                format!("block id '{}' is reserved", block.id),
            ));
        }
    }

    let plan = plan(&workflow.blocks, &workflow.connections)?;
    debug!(workflow = %workflow.name, levels = ?plan.levels(), "Planned workflow");

    let mut blocks = HashMap::with_capacity(workflow.blocks.len());
    for block in &workflow.blocks {
        let config = BlockConfig::decode(block.kind, &block.config).map_err(|e| {
            GraphError::at(
                GraphErrorKind::InvalidConfig,
                &block.id,
                format!("block '{}' ({}): {}", block.id, block.kind, e),
            )
        })?;

        let upstream = workflow
            .upstream_of(&block.id)
            .into_iter()
            .map(str::to_string)
            .collect();

        if block.kind != BlockKind::Respond && workflow.downstream_of(&block.id).is_empty() {
            warn!(
                workflow = %workflow.name,
                block_id = %block.id,
                block_kind = %block.kind,
                "Block has no outgoing connection and does not respond; its output is unused"
            );
        }

        blocks.insert(
            block.id.clone(),
            CompiledBlock {
                id: block.id.clone(),
                kind: block.kind,
                config,
                upstream,
            },
        );
    }

    // plan() guarantees at least one respond block
    let mut respond_block: Option<(usize, &str)> = None;
    for block in workflow.blocks.iter().filter(|b| b.kind == BlockKind::Respond) {
        let level = plan.level_of(&block.id).unwrap_or(0);
        match respond_block {
            Some((best, _)) if best >= level => {}
            _ => respond_block = Some((level, block.id.as_str())),
        }
    }
    let respond_block = respond_block
        .map(|(_, id)| id.to_string())
        .ok_or_else(|| GraphError::new(GraphErrorKind::NoResponse, "workflow has no respond block"))?;

    for block in workflow.blocks.iter().filter(|b| b.kind == BlockKind::Respond) {
        if block.id != respond_block {
            warn!(
                workflow = %workflow.name,
                block_id = %block.id,
                chosen = %respond_block,
                "Respond block is not the terminal one and will not answer"
            );
        }
    }

    Ok(CompiledWorkflow {
        name: workflow.name.clone(),
        plan,
        blocks,
        respond_block,
    })
}
