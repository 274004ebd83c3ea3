//! fleetlb Core Library
//!
//! Shared data model and persistence for the load balancer:
//! - Node, ping, downtime, request record and payout models
//! - Fixed-point reward amounts
//! - Repository traits with in-memory and sled-backed stores
//! - Repeating background tasks with clean shutdown

pub mod amount;
pub mod db;
pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod task;

pub use amount::{Amount, FeeRate, AMOUNT_DECIMALS, UNIT};
pub use db::FleetDb;
pub use error::{RepositoryError, Result};
pub use memory::MemoryStore;
pub use models::{Downtime, Node, NodeId, NodeStatus, Payout, Ping, Record};
pub use repository::{
    DowntimeRepository, NodeRepository, PayoutRepository, PingRepository, RecordRepository, Repos,
};
pub use task::RepeatingTask;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
