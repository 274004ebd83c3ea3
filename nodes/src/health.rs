//! Heartbeat-driven node health
//!
//! Penalty detection is reactive: each ping compares its timestamp with the
//! previous ping (or the registration time for a first ping). A gap above the
//! threshold writes a [`Downtime`] and puts the node on cooldown; an
//! in-cadence ping makes it active again.
//!
//! The status is written last, after the downtime and the ping, so a failed
//! ping leaves the node as it was and the retry sees the same gap.

use crate::error::{FleetError, Result};
use chrono::{DateTime, Utc};
use fleet_core::{Downtime, Node, NodeStatus, Ping, Repos};
use std::time::Duration;
use tracing::{debug, info};

/// Maximum allowed gap between two pings (10 seconds)
pub const DEFAULT_PING_INTERVAL_THRESHOLD: Duration = Duration::from_secs(10);

/// Result of processing one ping
#[derive(Debug, Clone, PartialEq)]
pub struct PingOutcome {
    pub status: NodeStatus,
    pub previous_status: NodeStatus,
    pub downtime: Option<Downtime>,
}

pub struct HealthTracker {
    repos: Repos,
    threshold: Duration,
}

impl HealthTracker {
    pub fn new(repos: Repos) -> Self {
        Self::with_threshold(repos, DEFAULT_PING_INTERVAL_THRESHOLD)
    }

    pub fn with_threshold(repos: Repos, threshold: Duration) -> Self {
        HealthTracker { repos, threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Process a heartbeat from `node_id` received at `timestamp`.
    ///
    /// Storage failures propagate so the node retries its heartbeat.
    pub fn on_ping(&self, node_id: &str, timestamp: DateTime<Utc>) -> Result<PingOutcome> {
        let node = self.repos.nodes.find_by_id(node_id).map_err(|e| {
            if e.is_not_found() {
                FleetError::NodeNotFound(node_id.to_string())
            } else {
                e.into()
            }
        })?;

        let last_seen = match self.repos.pings.find_latest(node_id)? {
            Some(ping) => ping.timestamp,
            None => node.registered_at,
        };

        let gap = (timestamp - last_seen).to_std().unwrap_or(Duration::ZERO);
        let (status, downtime) = if gap > self.threshold {
            let downtime = Downtime {
                node_id: node_id.to_string(),
                start: last_seen,
                end: timestamp,
            };
            // keyed by node and start, a retried ping overwrites it
            self.repos.downtimes.save(&downtime)?;
            (NodeStatus::Penalized, Some(downtime))
        } else {
            (NodeStatus::Active, None)
        };

        self.repos.pings.save(&Ping {
            node_id: node_id.to_string(),
            timestamp,
        })?;
        debug!(node = %node_id, "ping");

        if status != node.status {
            self.repos.nodes.update_status(node_id, status)?;
            info!(
                node = %node_id,
                from = %node.status,
                to = %status,
                gap_secs = gap.as_secs(),
                "node status changed"
            );
        }

        Ok(PingOutcome {
            status,
            previous_status: node.status,
            downtime,
        })
    }

    pub fn get_all_active_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.repos.nodes.get_all_active_nodes()?)
    }

    pub fn get_penalized_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.repos.nodes.get_penalized_nodes()?)
    }

    pub fn downtimes(&self, node_id: &str) -> Result<Vec<Downtime>> {
        Ok(self.repos.downtimes.find_by_node(node_id)?)
    }
}
