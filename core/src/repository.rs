//! Persistence-agnostic repository interfaces
//!
//! The engine treats these as a consistent, durable store. Implementations
//! live in [`crate::memory`] and [`crate::db`].

use crate::error::Result;
use crate::models::{Downtime, Node, NodeStatus, Payout, Ping, Record};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait NodeRepository: Send + Sync {
    /// Insert or replace a node
    fn save(&self, node: &Node) -> Result<()>;

    /// Fails with `NotFound` for unknown ids
    fn find_by_id(&self, id: &str) -> Result<Node>;

    fn get_all(&self) -> Result<Vec<Node>>;

    /// Set a node's status and return the updated node
    fn update_status(&self, id: &str, status: NodeStatus) -> Result<Node>;

    fn update_tunnel_port(&self, id: &str, port: Option<u16>) -> Result<()>;

    fn get_all_active_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.get_all()?.into_iter().filter(Node::is_active).collect())
    }

    fn get_penalized_nodes(&self) -> Result<Vec<Node>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(Node::is_penalized)
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.get_all()?.len())
    }
}

pub trait PingRepository: Send + Sync {
    fn save(&self, ping: &Ping) -> Result<()>;

    /// Most recent ping of a node, if it ever pinged
    fn find_latest(&self, node_id: &str) -> Result<Option<Ping>>;
}

pub trait DowntimeRepository: Send + Sync {
    fn save(&self, downtime: &Downtime) -> Result<()>;

    fn find_by_node(&self, node_id: &str) -> Result<Vec<Downtime>>;
}

pub trait RecordRepository: Send + Sync {
    fn save(&self, record: &Record) -> Result<()>;

    /// Records with `from < timestamp <= to`
    fn find_in_interval(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Record>>;

    fn count_successful_requests(&self) -> Result<u64>;

    fn count_failed_requests(&self) -> Result<u64>;
}

pub trait PayoutRepository: Send + Sync {
    fn save(&self, payout: &Payout) -> Result<()>;

    /// Fails with `NotFound` when no payout was ever saved
    fn find_latest_payout(&self) -> Result<Payout>;

    /// All payouts, oldest first
    fn get_all(&self) -> Result<Vec<Payout>>;
}

/// Bundle of repositories shared by the engine components
#[derive(Clone)]
pub struct Repos {
    pub nodes: Arc<dyn NodeRepository>,
    pub pings: Arc<dyn PingRepository>,
    pub downtimes: Arc<dyn DowntimeRepository>,
    pub records: Arc<dyn RecordRepository>,
    pub payouts: Arc<dyn PayoutRepository>,
}

impl Repos {
    /// All repositories backed by one in-memory store
    pub fn in_memory() -> Self {
        let store = Arc::new(crate::memory::MemoryStore::new());
        Self::from_store(store)
    }

    /// All repositories backed by one sled database
    pub fn sled(db: crate::db::FleetDb) -> Self {
        Self::from_store(Arc::new(db))
    }

    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: NodeRepository
            + PingRepository
            + DowntimeRepository
            + RecordRepository
            + PayoutRepository
            + 'static,
    {
        Repos {
            nodes: store.clone(),
            pings: store.clone(),
            downtimes: store.clone(),
            records: store.clone(),
            payouts: store,
        }
    }
}
