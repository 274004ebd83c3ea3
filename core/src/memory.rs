//! In-memory repository store
//!
//! All tables sit behind one lock so readers always see a consistent
//! snapshot of node status.

use crate::error::{RepositoryError, Result};
use crate::models::{Downtime, Node, NodeId, NodeStatus, Payout, Ping, Record};
use crate::repository::{
    DowntimeRepository, NodeRepository, PayoutRepository, PingRepository, RecordRepository,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct Tables {
    nodes: BTreeMap<NodeId, Node>,
    pings: HashMap<NodeId, Vec<Ping>>,
    downtimes: Vec<Downtime>,
    records: Vec<Record>,
    payouts: Vec<Payout>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeRepository for MemoryStore {
    fn save(&self, node: &Node) -> Result<()> {
        self.tables.write().nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Node> {
        self.tables
            .read()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("node {}", id)))
    }

    fn get_all(&self) -> Result<Vec<Node>> {
        Ok(self.tables.read().nodes.values().cloned().collect())
    }

    fn update_status(&self, id: &str, status: NodeStatus) -> Result<Node> {
        let mut tables = self.tables.write();
        let node = tables
            .nodes
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("node {}", id)))?;
        node.status = status;
        Ok(node.clone())
    }

    fn update_tunnel_port(&self, id: &str, port: Option<u16>) -> Result<()> {
        let mut tables = self.tables.write();
        let node = tables
            .nodes
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("node {}", id)))?;
        node.tunnel_port = port;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.tables.read().nodes.len())
    }
}

impl PingRepository for MemoryStore {
    fn save(&self, ping: &Ping) -> Result<()> {
        self.tables
            .write()
            .pings
            .entry(ping.node_id.clone())
            .or_default()
            .push(ping.clone());
        Ok(())
    }

    fn find_latest(&self, node_id: &str) -> Result<Option<Ping>> {
        Ok(self
            .tables
            .read()
            .pings
            .get(node_id)
            .and_then(|pings| pings.iter().max_by_key(|p| p.timestamp).cloned()))
    }
}

impl DowntimeRepository for MemoryStore {
    fn save(&self, downtime: &Downtime) -> Result<()> {
        let mut tables = self.tables.write();
        match tables
            .downtimes
            .iter_mut()
            .find(|d| d.node_id == downtime.node_id && d.start == downtime.start)
        {
            Some(existing) => *existing = downtime.clone(),
            None => tables.downtimes.push(downtime.clone()),
        }
        Ok(())
    }

    fn find_by_node(&self, node_id: &str) -> Result<Vec<Downtime>> {
        Ok(self
            .tables
            .read()
            .downtimes
            .iter()
            .filter(|d| d.node_id == node_id)
            .cloned()
            .collect())
    }
}

impl RecordRepository for MemoryStore {
    fn save(&self, record: &Record) -> Result<()> {
        self.tables.write().records.push(record.clone());
        Ok(())
    }

    fn find_in_interval(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Record>> {
        Ok(self
            .tables
            .read()
            .records
            .iter()
            .filter(|r| r.timestamp > from && r.timestamp <= to)
            .cloned()
            .collect())
    }

    fn count_successful_requests(&self) -> Result<u64> {
        Ok(self.tables.read().records.iter().filter(|r| r.success).count() as u64)
    }

    fn count_failed_requests(&self) -> Result<u64> {
        Ok(self.tables.read().records.iter().filter(|r| !r.success).count() as u64)
    }
}

impl PayoutRepository for MemoryStore {
    fn save(&self, payout: &Payout) -> Result<()> {
        let mut tables = self.tables.write();
        tables.payouts.push(payout.clone());
        tables.payouts.sort_by_key(|p| p.timestamp);
        Ok(())
    }

    fn find_latest_payout(&self) -> Result<Payout> {
        self.tables
            .read()
            .payouts
            .last()
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound("payout".to_string()))
    }

    fn get_all(&self) -> Result<Vec<Payout>> {
        Ok(self.tables.read().payouts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::repository::Repos;
    use chrono::Duration;

    #[test]
    fn test_node_status_queries() {
        let repos = Repos::in_memory();
        repos.nodes.save(&Node::new("a", "addr-a")).unwrap();
        repos.nodes.save(&Node::new("b", "addr-b")).unwrap();
        repos.nodes.save(&Node::new("c", "addr-c")).unwrap();

        repos.nodes.update_status("a", NodeStatus::Active).unwrap();
        repos.nodes.update_status("b", NodeStatus::Penalized).unwrap();

        let active = repos.nodes.get_all_active_nodes().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");

        let penalized = repos.nodes.get_penalized_nodes().unwrap();
        assert_eq!(penalized.len(), 1);
        assert_eq!(penalized[0].id, "b");
        assert_eq!(repos.nodes.count().unwrap(), 3);
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let repos = Repos::in_memory();
        let err = repos.nodes.update_status("ghost", NodeStatus::Active).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_downtime_saved_twice_is_stored_once() {
        let repos = Repos::in_memory();
        let now = Utc::now();
        let downtime = Downtime {
            node_id: "a".to_string(),
            start: now - Duration::seconds(90),
            end: now,
        };
        repos.downtimes.save(&downtime).unwrap();
        repos.downtimes.save(&downtime).unwrap();
        assert_eq!(repos.downtimes.find_by_node("a").unwrap().len(), 1);
    }

    #[test]
    fn test_latest_ping() {
        let repos = Repos::in_memory();
        let now = Utc::now();
        assert!(repos.pings.find_latest("a").unwrap().is_none());

        for offset in [30, 10, 20] {
            repos
                .pings
                .save(&Ping {
                    node_id: "a".to_string(),
                    timestamp: now - Duration::seconds(offset),
                })
                .unwrap();
        }

        let latest = repos.pings.find_latest("a").unwrap().unwrap();
        assert_eq!(latest.timestamp, now - Duration::seconds(10));
    }

    #[test]
    fn test_record_interval_and_counts() {
        let repos = Repos::in_memory();
        let now = Utc::now();
        for (offset, success) in [(5, true), (3, false), (1, true)] {
            repos
                .records
                .save(&Record {
                    node_id: "a".to_string(),
                    success,
                    timestamp: now - Duration::seconds(offset),
                })
                .unwrap();
        }

        assert_eq!(repos.records.count_successful_requests().unwrap(), 2);
        assert_eq!(repos.records.count_failed_requests().unwrap(), 1);

        let window = repos
            .records
            .find_in_interval(now - Duration::seconds(5), now)
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_latest_payout() {
        let repos = Repos::in_memory();
        assert!(repos.payouts.find_latest_payout().unwrap_err().is_not_found());

        let now = Utc::now();
        let mut newer = Payout::anchor(now);
        newer.lb_fee = Amount::from_tokens(1);
        repos.payouts.save(&newer).unwrap();
        repos.payouts.save(&Payout::anchor(now - Duration::days(3))).unwrap();

        assert_eq!(repos.payouts.find_latest_payout().unwrap(), newer);
        assert_eq!(repos.payouts.get_all().unwrap().len(), 2);
    }
}
