//! Fleet error types

use fleet_core::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("No eligible node available")]
    NoEligibleNode,

    #[error("Invalid selection strategy: {0} (expected round-robin or random)")]
    InvalidStrategy(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("Capacity reached: {capacity} nodes already connected")]
    CapacityReached { capacity: usize },

    #[error("Whitelist error: {0}")]
    Whitelist(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, FleetError>;
