//! Payout error types

use crate::transfer::TransferError;
use fleet_core::RepositoryError;
use fleet_nodes::FleetError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Invalid payout configuration: {0}")]
    InvalidConfig(String),

    #[error("A payout is already running")]
    AlreadyRunning,

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Nodes(#[from] FleetError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, PayoutError>;
