//! Forwarding of client RPC calls into node tunnels

use async_trait::async_trait;
use axum::body::Bytes;
use fleet_network::TunnelRegistry;
use fleet_nodes::Route;
use std::sync::Arc;

/// Sends a raw RPC request body to the node picked by the router
#[async_trait]
pub trait RpcForwarder: Send + Sync {
    async fn forward(&self, route: &Route, body: Bytes) -> Result<Bytes, String>;
}

/// Forwards over the node's own tunnel connection
pub struct TunnelForwarder {
    registry: Arc<TunnelRegistry>,
}

impl TunnelForwarder {
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        TunnelForwarder { registry }
    }
}

#[async_trait]
impl RpcForwarder for TunnelForwarder {
    async fn forward(&self, route: &Route, body: Bytes) -> Result<Bytes, String> {
        let channel = self
            .registry
            .channel(&route.node_id)
            .map_err(|e| e.to_string())?;
        let response = channel
            .exchange(body.to_vec())
            .await
            .map_err(|e| e.to_string())?;
        Ok(Bytes::from(response))
    }
}
