//! Block handlers - one per block kind.

mod conditional;
mod datastore_query;
mod intake;
mod outbound_call;
mod registry;
mod respond;
mod transform;
mod types;

pub use conditional::ConditionalBlock;
pub use datastore_query::DatastoreQueryBlock;
pub use intake::IntakeBlock;
pub use outbound_call::{validate_url, OutboundCallBlock};
pub use registry::HandlerRegistry;
pub use respond::RespondBlock;
pub use transform::TransformBlock;
pub use types::{BlockHandler, BlockOutput, HandlerResult};
