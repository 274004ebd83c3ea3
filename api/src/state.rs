//! API State Management

use crate::forward::RpcForwarder;
use crate::metrics::FleetMetrics;
use fleet_core::Repos;
use fleet_network::TunnelRegistry;
use fleet_nodes::{HealthTracker, NodeRegistrar, NodeRouter, RequestRecorder};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub repos: Repos,
    pub registry: Arc<TunnelRegistry>,
    pub router: Arc<NodeRouter>,
    pub recorder: RequestRecorder,
    pub health: Arc<HealthTracker>,
    pub registrar: Arc<NodeRegistrar>,
    pub metrics: Arc<FleetMetrics>,
    pub forwarder: Arc<dyn RpcForwarder>,
    /// Tunnel server address advertised to registering nodes
    pub tunnel_server_address: String,
    pub start_time: std::time::Instant,
}
