//! Tunnel admission backed by the node store and whitelist

use crate::whitelist::Whitelist;
use fleet_core::Repos;
use fleet_network::{TunnelGatekeeper, TunnelInfo};
use std::sync::Arc;
use tracing::warn;

pub struct FleetGatekeeper {
    repos: Repos,
    whitelist: Arc<Whitelist>,
}

impl FleetGatekeeper {
    pub fn new(repos: Repos, whitelist: Arc<Whitelist>) -> Self {
        FleetGatekeeper { repos, whitelist }
    }
}

impl TunnelGatekeeper for FleetGatekeeper {
    fn authorize(&self, node_id: &str) -> Result<(), String> {
        if !self.whitelist.is_allowed(node_id) {
            return Err(format!("node {} is not whitelisted", node_id));
        }
        match self.repos.nodes.find_by_id(node_id) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(format!("node {} is not registered", node_id)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn on_open(&self, info: &TunnelInfo) {
        if let Err(e) = self
            .repos
            .nodes
            .update_tunnel_port(&info.node_id, Some(info.port))
        {
            warn!(node = %info.node_id, error = %e, "failed to store tunnel port");
        }
    }

    fn on_close(&self, node_id: &str) {
        if let Err(e) = self.repos.nodes.update_tunnel_port(node_id, None) {
            warn!(node = %node_id, error = %e, "failed to clear tunnel port");
        }
    }
}
