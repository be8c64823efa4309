//! Execution engine for workflows.

mod condition;
mod context;
mod executor;
pub mod path;
mod resolver;

pub use condition::{compare_values, evaluate_condition, CompareOp, Condition, Operand};
pub use context::ExecutionContext;
pub use executor::{Engine, EngineResponse};
pub use resolver::{
    resolve, tokenize, value_to_text, whole_token, Piece, Reference, Resolved, Resolver,
    Unresolved, ITEM_ROOT,
};
