//! Load balancer data model

use crate::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type NodeId = String;

/// Node lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Registered, no heartbeat seen yet
    Pending,
    /// Pinging within the allowed interval
    Active,
    /// On cooldown after a heartbeat gap
    Penalized,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Penalized => write!(f, "penalized"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub payout_address: String,
    pub config_hash: String,
    pub status: NodeStatus,
    pub tunnel_port: Option<u16>,
    pub registered_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, payout_address: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            name: None,
            payout_address: payout_address.into(),
            config_hash: String::new(),
            status: NodeStatus::Pending,
            tunnel_port: None,
            registered_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    pub fn is_penalized(&self) -> bool {
        self.status == NodeStatus::Penalized
    }
}

/// One heartbeat received from a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ping {
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
}

/// Gap between two heartbeats that exceeded the allowed interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Downtime {
    pub node_id: NodeId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Downtime {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Outcome of one client request routed to a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub node_id: NodeId,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// One executed payout cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub timestamp: DateTime<Utc>,
    /// Reward pool evaluated for this cycle
    pub total_reward: Amount,
    /// Fee actually transferred to the load balancer
    pub lb_fee: Amount,
    /// Amounts actually transferred, by node
    pub distribution: BTreeMap<NodeId, Amount>,
    /// Transaction references returned by the transfer collaborator
    pub transactions: Vec<String>,
}

impl Payout {
    /// Zero-amount payout used as the starting point for scheduling
    pub fn anchor(timestamp: DateTime<Utc>) -> Self {
        Payout {
            timestamp,
            total_reward: Amount::ZERO,
            lb_fee: Amount::ZERO,
            distribution: BTreeMap::new(),
            transactions: Vec::new(),
        }
    }

    pub fn distributed(&self) -> Amount {
        self.distribution.values().copied().sum::<Amount>().saturating_add(self.lb_fee)
    }
}
