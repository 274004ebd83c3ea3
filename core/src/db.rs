//! Sled-based persistence for load balancer state
//!
//! Key layout:
//! - `node:{id}`
//! - `ping:{id_len}:{node_id}:{millis}`
//! - `downtime:{id_len}:{node_id}:{millis}`
//! - `record:{millis}:{uuid}`
//! - `payout:{millis}`
//!
//! Timestamps are zero padded so lexicographic order is time order. Node ids
//! in per-node keys carry their length, so the prefix of one node never
//! matches another id that merely starts with it (`a` and `a:x`).

use crate::error::{RepositoryError, Result};
use crate::models::{Downtime, Node, NodeStatus, Payout, Ping, Record};
use crate::repository::{
    DowntimeRepository, NodeRepository, PayoutRepository, PingRepository, RecordRepository,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

#[derive(Debug)]
pub struct FleetDb {
    db: sled::Db,
    path: String,
    // serializes read-modify-write of node entries
    node_lock: Mutex<()>,
}

fn ts_key(ts: &DateTime<Utc>) -> String {
    format!("{:020}", ts.timestamp_millis().max(0))
}

/// Prefix of all rows of `kind` belonging to `node_id`
fn node_prefix(kind: &str, node_id: &str) -> String {
    format!("{}:{}:{}:", kind, node_id.len(), node_id)
}

impl FleetDb {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = sled::open(&path)
            .map_err(|e| RepositoryError::StorageError(format!("Failed to open database: {}", e)))?;

        Ok(FleetDb {
            db,
            path: path_str,
            node_lock: Mutex::new(()),
        })
    }

    /// Get the database path
    pub fn path(&self) -> &str {
        &self.path
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = bincode::serialize(value)
            .map_err(|e| RepositoryError::SerializationError(format!("{}: {}", key, e)))?;

        self.db
            .insert(key.as_bytes(), data)
            .map_err(|e| RepositoryError::StorageError(format!("Failed to save {}: {}", key, e)))?;

        self.db
            .flush()
            .map_err(|e| RepositoryError::StorageError(format!("Failed to flush {}: {}", key, e)))?;

        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(data)) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| RepositoryError::SerializationError(format!("{}: {}", key, e))),
            Ok(None) => Ok(None),
            Err(e) => Err(RepositoryError::StorageError(format!(
                "Failed to load {}: {}",
                key, e
            ))),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (_, data) = entry.map_err(|e| {
                    RepositoryError::StorageError(format!("Failed to scan {}: {}", prefix, e))
                })?;
                bincode::deserialize(&data)
                    .map_err(|e| RepositoryError::SerializationError(format!("{}: {}", prefix, e)))
            })
            .collect()
    }

    fn last<T: DeserializeOwned>(&self, prefix: &str) -> Result<Option<T>> {
        match self.db.scan_prefix(prefix.as_bytes()).next_back() {
            Some(Ok((_, data))) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| RepositoryError::SerializationError(format!("{}: {}", prefix, e))),
            Some(Err(e)) => Err(RepositoryError::StorageError(format!(
                "Failed to scan {}: {}",
                prefix, e
            ))),
            None => Ok(None),
        }
    }

    fn modify_node<F: FnOnce(&mut Node)>(&self, id: &str, f: F) -> Result<Node> {
        let _guard = self.node_lock.lock();
        let key = format!("node:{}", id);
        let mut node: Node = self
            .get(&key)?
            .ok_or_else(|| RepositoryError::NotFound(format!("node {}", id)))?;
        f(&mut node);
        self.put(&key, &node)?;
        Ok(node)
    }
}

impl NodeRepository for FleetDb {
    fn save(&self, node: &Node) -> Result<()> {
        let _guard = self.node_lock.lock();
        self.put(&format!("node:{}", node.id), node)
    }

    fn find_by_id(&self, id: &str) -> Result<Node> {
        self.get(&format!("node:{}", id))?
            .ok_or_else(|| RepositoryError::NotFound(format!("node {}", id)))
    }

    fn get_all(&self) -> Result<Vec<Node>> {
        self.scan("node:")
    }

    fn update_status(&self, id: &str, status: NodeStatus) -> Result<Node> {
        self.modify_node(id, |node| node.status = status)
    }

    fn update_tunnel_port(&self, id: &str, port: Option<u16>) -> Result<()> {
        self.modify_node(id, |node| node.tunnel_port = port).map(|_| ())
    }
}

impl PingRepository for FleetDb {
    fn save(&self, ping: &Ping) -> Result<()> {
        self.put(
            &format!(
                "{}{}",
                node_prefix("ping", &ping.node_id),
                ts_key(&ping.timestamp)
            ),
            ping,
        )
    }

    fn find_latest(&self, node_id: &str) -> Result<Option<Ping>> {
        self.last(&node_prefix("ping", node_id))
    }
}

impl DowntimeRepository for FleetDb {
    fn save(&self, downtime: &Downtime) -> Result<()> {
        self.put(
            &format!(
                "{}{}",
                node_prefix("downtime", &downtime.node_id),
                ts_key(&downtime.start)
            ),
            downtime,
        )
    }

    fn find_by_node(&self, node_id: &str) -> Result<Vec<Downtime>> {
        self.scan(&node_prefix("downtime", node_id))
    }
}

impl RecordRepository for FleetDb {
    fn save(&self, record: &Record) -> Result<()> {
        self.put(
            &format!(
                "record:{}:{}",
                ts_key(&record.timestamp),
                uuid::Uuid::new_v4()
            ),
            record,
        )
    }

    fn find_in_interval(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Record>> {
        let records: Vec<Record> = self.scan("record:")?;
        Ok(records
            .into_iter()
            .filter(|r| r.timestamp > from && r.timestamp <= to)
            .collect())
    }

    fn count_successful_requests(&self) -> Result<u64> {
        let records: Vec<Record> = self.scan("record:")?;
        Ok(records.iter().filter(|r| r.success).count() as u64)
    }

    fn count_failed_requests(&self) -> Result<u64> {
        let records: Vec<Record> = self.scan("record:")?;
        Ok(records.iter().filter(|r| !r.success).count() as u64)
    }
}

impl PayoutRepository for FleetDb {
    fn save(&self, payout: &Payout) -> Result<()> {
        self.put(&format!("payout:{}", ts_key(&payout.timestamp)), payout)
    }

    fn find_latest_payout(&self) -> Result<Payout> {
        self.last("payout:")?
            .ok_or_else(|| RepositoryError::NotFound("payout".to_string()))
    }

    fn get_all(&self) -> Result<Vec<Payout>> {
        self.scan("payout:")
    }
}
