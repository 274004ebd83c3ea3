//! API routes organization
//!
//! - `/` - JSON-RPC passthrough to the node fleet
//! - `nodes` - Node registration and heartbeats
//! - `/api/v1/stats` and `/metrics` - Statistics and Prometheus exposition

mod nodes;

use crate::handlers::{health_check, metrics, rpc_passthrough, statistics};
use crate::ApiState;
use axum::{
    routing::{get, post},
    Router,
};

/// Create the main router with all API endpoints
pub fn create_routes() -> Router<ApiState> {
    Router::new()
        .route("/", post(rpc_passthrough))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/api/v1/stats", get(statistics))
        .nest("/api/v1/nodes", nodes::node_routes())
}
