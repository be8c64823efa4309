//! Handler registry - one handler per block kind.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::BlockHandler;
use super::{
    ConditionalBlock, DatastoreQueryBlock, IntakeBlock, OutboundCallBlock, RespondBlock,
    TransformBlock,
};
use crate::config::Config;
use crate::datastore::Datastore;
use crate::error::Result;
use crate::workflow::BlockKind;

/// Registry of block handlers.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<BlockKind, Arc<dyn BlockHandler>>,
}

impl HandlerRegistry {
    /// Create a registry with the built-in handlers.
    pub fn new(datastore: Arc<dyn Datastore>, config: &Config) -> Result<Self> {
        let mut registry = Self::empty();

        registry.register(Arc::new(IntakeBlock::new()));
        registry.register(Arc::new(DatastoreQueryBlock::new(
            datastore,
            config.datastore.default_find_limit,
            config.datastore.max_find_limit,
        )));
        registry.register(Arc::new(
            OutboundCallBlock::from_settings(&config.outbound)?
                .with_deadline(config.engine.block_timeout()),
        ));
        registry.register(Arc::new(ConditionalBlock::new()));
        registry.register(Arc::new(TransformBlock::new()));
        registry.register(Arc::new(RespondBlock::new()));

        Ok(registry)
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any handler of the same kind.
    pub fn register(&mut self, handler: Arc<dyn BlockHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Get the handler for a kind.
    pub fn get(&self, kind: BlockKind) -> Option<Arc<dyn BlockHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Descriptions of all registered handlers.
    pub fn descriptions(&self) -> Vec<(BlockKind, &str)> {
        let mut list: Vec<_> = self
            .handlers
            .iter()
            .map(|(kind, handler)| (*kind, handler.description()))
            .collect();
        list.sort_by_key(|(kind, _)| kind.as_str());
        list
    }
}
