//! Node management endpoints

use crate::handlers::{ping, register_node};
use crate::ApiState;
use axum::{routing::post, Router};

/// Register node management routes
pub fn node_routes() -> Router<ApiState> {
    Router::new()
        .route("/", post(register_node))
        .route("/pings", post(ping))
}
