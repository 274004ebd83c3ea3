//! fleetlb HTTP API
//!
//! Client-facing RPC passthrough plus the node-facing registration and
//! heartbeat endpoints, statistics and Prometheus metrics.

mod error;
pub mod forward;
pub mod handlers;
pub mod metrics;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use forward::{RpcForwarder, TunnelForwarder};
pub use metrics::{start_pollers, FleetMetrics, MetricsSources, PollIntervals};
pub use state::ApiState;

use axum::http::{header::CONTENT_TYPE, HeaderName, Method};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the application router with middleware
pub fn app(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(handlers::NODE_ID_HEADER)]);

    routes::create_routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn start_server(addr: SocketAddr, state: ApiState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "api server listening");
    axum::serve(listener, app(state)).await
}
