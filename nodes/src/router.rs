//! Request routing
//!
//! Narrows the fleet to eligible nodes (live tunnel, active, whitelisted)
//! and lets the configured selector pick one of them.

use crate::error::{FleetError, Result};
use crate::selection::{selector_for, NodeSelector, SelectionStrategy};
use crate::whitelist::Whitelist;
use fleet_core::{NodeId, Repos};
use fleet_network::{TunnelError, TunnelRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Node chosen for one request and the local port of its tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub node_id: NodeId,
    pub port: u16,
}

pub struct NodeRouter {
    repos: Repos,
    registry: Arc<TunnelRegistry>,
    whitelist: Arc<Whitelist>,
    selector: Box<dyn NodeSelector>,
}

impl NodeRouter {
    pub fn new(
        repos: Repos,
        registry: Arc<TunnelRegistry>,
        whitelist: Arc<Whitelist>,
        strategy: SelectionStrategy,
    ) -> Self {
        Self::with_selector(repos, registry, whitelist, selector_for(strategy))
    }

    pub fn with_selector(
        repos: Repos,
        registry: Arc<TunnelRegistry>,
        whitelist: Arc<Whitelist>,
        selector: Box<dyn NodeSelector>,
    ) -> Self {
        NodeRouter {
            repos,
            registry,
            whitelist,
            selector,
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.selector.strategy()
    }

    /// Ids of nodes that may take traffic right now, in id order
    pub fn eligible_nodes(&self) -> Result<Vec<NodeId>> {
        let active: HashSet<NodeId> = self
            .repos
            .nodes
            .get_all_active_nodes()?
            .into_iter()
            .map(|node| node.id)
            .collect();

        Ok(self
            .registry
            .tunnels()
            .into_iter()
            .map(|tunnel| tunnel.node_id)
            .filter(|id| active.contains(id) && self.whitelist.is_allowed(id))
            .collect())
    }

    /// Pick a node for the next request.
    ///
    /// A node whose tunnel closed between filtering and selection is dropped
    /// and the pick is repeated.
    pub fn route(&self) -> Result<Route> {
        let mut pool = self.eligible_nodes()?;

        loop {
            let node_id = self.selector.select(&pool)?;
            match self.registry.lookup(&node_id) {
                Ok(tunnel) => {
                    return Ok(Route {
                        node_id,
                        port: tunnel.port,
                    })
                }
                Err(TunnelError::NotFound(_)) => {
                    debug!(node = %node_id, "selected node lost its tunnel, retrying");
                    pool.retain(|id| id != &node_id);
                    if pool.is_empty() {
                        return Err(FleetError::NoEligibleNode);
                    }
                }
                Err(e) => {
                    debug!(node = %node_id, error = %e, "tunnel lookup failed");
                    return Err(FleetError::NoEligibleNode);
                }
            }
        }
    }
}
