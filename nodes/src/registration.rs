//! Node registration

use crate::error::{FleetError, Result};
use crate::whitelist::Whitelist;
use chrono::Utc;
use fleet_core::{Node, NodeStatus, Repos};
use fleet_network::TunnelRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Registration payload sent by a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRegistration {
    pub id: String,
    #[serde(default)]
    pub config_hash: String,
    pub payout_address: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Admits nodes while fewer than the registry capacity are connected.
/// Nodes that registered earlier but dropped their tunnel do not count.
pub struct NodeRegistrar {
    repos: Repos,
    whitelist: Arc<Whitelist>,
    registry: Arc<TunnelRegistry>,
    // lookup-then-insert must not interleave
    lock: Mutex<()>,
}

impl NodeRegistrar {
    pub fn new(repos: Repos, whitelist: Arc<Whitelist>, registry: Arc<TunnelRegistry>) -> Self {
        NodeRegistrar {
            repos,
            whitelist,
            registry,
            lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// Store a new node as pending, or refresh the metadata of a known node
    /// without touching its status. The tunnel registry enforces the limit
    /// again when the node connects.
    pub fn register(&self, request: NodeRegistration) -> Result<Node> {
        let id = request.id.trim().to_string();
        if id.is_empty() {
            return Err(FleetError::NodeNotFound(request.id));
        }
        if !self.whitelist.is_allowed(&id) {
            return Err(FleetError::NotWhitelisted(id));
        }

        let _guard = self.lock.lock();
        let node = match self.repos.nodes.find_by_id(&id) {
            Ok(mut existing) => {
                existing.config_hash = request.config_hash;
                existing.payout_address = request.payout_address;
                existing.name = request.name;
                info!(node = %id, status = %existing.status, "node re-registered");
                existing
            }
            Err(e) if e.is_not_found() => {
                if !self.registry.has_free_slot() {
                    return Err(FleetError::CapacityReached {
                        capacity: self.registry.capacity(),
                    });
                }
                info!(node = %id, "node registered");
                Node {
                    id: id.clone(),
                    name: request.name,
                    payout_address: request.payout_address,
                    config_hash: request.config_hash,
                    status: NodeStatus::Pending,
                    tunnel_port: None,
                    registered_at: Utc::now(),
                }
            }
            Err(e) => return Err(e.into()),
        };

        self.repos.nodes.save(&node)?;
        Ok(node)
    }
}
