//! fleetlb Payouts
//!
//! Periodic reward distribution to the nodes that served traffic:
//! - Fee and proportional share calculation in fixed-point amounts
//! - Daily schedule check with a single run in flight
//! - Pluggable transfer execution with partial-result accounting

pub mod config;
pub mod display;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod script;
pub mod transfer;

pub use config::{Credential, PayoutConfig, DEFAULT_TRANSFER_TIMEOUT};
pub use distribution::{calculate_distribution, Distribution};
pub use engine::{ensure_anchor, next_payout_date, PayoutCheck, PayoutEngine, PayoutReport};
pub use error::{PayoutError, Result};
pub use scheduler::{start_scheduled_payout, start_scheduled_payout_every, PAYOUT_CHECK_PERIOD};
pub use script::ScriptTransfer;
pub use transfer::{
    Payee, Recipient, TransferDetail, TransferError, TransferExecutor, TransferLog,
};
