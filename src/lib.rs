//! blockflow - run block graphs as API handlers
//!
//! A workflow is a small directed graph of typed blocks: intake, datastore
//! query, outbound call, conditional, transform and respond. The engine plans
//! the graph into levels, runs each level's blocks with `{{ reference }}`
//! interpolation against earlier outputs, and returns the respond block's
//! envelope.
//!
//! ## Example
//!
//! ```yaml
//! name: adult-users
//! status: deployed
//!
//! blocks:
//!   - id: in
//!     kind: intake
//!     config:
//!       schema:
//!         - { name: age, type: number }
//!
//!   - id: db
//!     kind: datastore_query
//!     config:
//!       collection: users
//!       query: { age: { $gt: "{{request_data.age}}" } }
//!
//!   - id: out
//!     kind: respond
//!     config:
//!       body: { data: "{{db.results}}", count: "{{db.count}}" }
//!
//! connections:
//!   - { source_block_id: in, target_block_id: db }
//!   - { source_block_id: db, target_block_id: out }
//! ```

pub mod blocks;
pub mod config;
pub mod datastore;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod workflow;

pub use config::Config;
pub use engine::{Engine, EngineResponse};
pub use error::{EngineError, Result};
