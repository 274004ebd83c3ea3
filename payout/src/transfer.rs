//! Transfer collaborator interface

use crate::config::Credential;
use async_trait::async_trait;
use fleet_core::{Amount, NodeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Who receives a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payee {
    LoadBalancerFee,
    Node { id: NodeId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub payee: Payee,
    pub address: String,
    pub amount: Amount,
}

/// One executed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDetail {
    pub payee: Payee,
    pub address: String,
    pub amount: Amount,
    pub tx_hash: String,
}

/// Transfer run that stopped early. `completed` holds the transfers that did
/// go through and must still be accounted for.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferError {
    pub message: String,
    pub completed: Vec<TransferDetail>,
}

impl TransferError {
    pub fn new(message: impl Into<String>) -> Self {
        TransferError {
            message: message.into(),
            completed: Vec::new(),
        }
    }

    pub fn partial(message: impl Into<String>, completed: Vec<TransferDetail>) -> Self {
        TransferError {
            message: message.into(),
            completed,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.completed.is_empty()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.completed.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(
                f,
                "{} ({} transfers completed)",
                self.message,
                self.completed.len()
            )
        }
    }
}

impl std::error::Error for TransferError {}

/// Transfers reported by a run while it is still in progress.
///
/// The engine reads it when a run is cut short, so executors record each
/// transfer as soon as it is broadcast.
#[derive(Debug, Clone, Default)]
pub struct TransferLog {
    entries: Arc<Mutex<Vec<TransferDetail>>>,
}

impl TransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, detail: TransferDetail) {
        self.entries.lock().push(detail);
    }

    pub fn snapshot(&self) -> Vec<TransferDetail> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Executes reward transfers on the target chain
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Transfer to every recipient in order. Each executed transfer is also
    /// recorded in `log` as it happens.
    async fn execute_payout(
        &self,
        credential: &Credential,
        recipients: &[Recipient],
        log: &TransferLog,
    ) -> Result<Vec<TransferDetail>, TransferError>;
}
