use crate::{ApiError, ApiResult, ApiState};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use fleet_core::{Node, NodeStatus};
use fleet_nodes::{NodeRegistration, NodeStats};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Header carrying the id of the pinging node
pub const NODE_ID_HEADER: &str = "x-node-id";

/// JSON-RPC passthrough to one eligible node
pub async fn rpc_passthrough(State(state): State<ApiState>, body: Bytes) -> ApiResult<Response> {
    let route = state.router.route()?;

    match state.forwarder.forward(&route, body).await {
        Ok(reply) => {
            state.recorder.record_outcome(&route.node_id, true);
            Ok(([(header::CONTENT_TYPE, "application/json")], reply).into_response())
        }
        Err(e) => {
            warn!(node = %route.node_id, port = route.port, error = %e, "forwarding failed");
            state.recorder.record_outcome(&route.node_id, false);
            Err(ApiError::BadGateway(format!(
                "node {} failed to answer",
                route.node_id
            )))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub node_id: String,
    pub status: NodeStatus,
}

/// Heartbeat. The gap is measured on the load balancer clock, a body is
/// ignored.
pub async fn ping(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<PingResponse>> {
    let node_id = headers
        .get(NODE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing X-Node-Id header".to_string()))?
        .to_string();

    let outcome = state.health.on_ping(&node_id, Utc::now())?;
    debug!(node = %node_id, status = %outcome.status, "ping handled");

    Ok(Json(PingResponse {
        node_id,
        status: outcome.status,
    }))
}

#[derive(Debug, Serialize)]
pub struct RegisterNodeResponse {
    pub node: Node,
    pub tunnel_server_address: String,
}

pub async fn register_node(
    State(state): State<ApiState>,
    Json(req): Json<NodeRegistration>,
) -> ApiResult<(StatusCode, Json<RegisterNodeResponse>)> {
    if req.payout_address.trim().is_empty() {
        return Err(ApiError::BadRequest("payout_address is required".to_string()));
    }
    let node = state.registrar.register(req)?;

    Ok((
        StatusCode::OK,
        Json(RegisterNodeResponse {
            node,
            tunnel_server_address: state.tunnel_server_address.clone(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: BTreeMap<String, NodeStats>,
    pub active_tunnels: usize,
}

pub async fn statistics(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let stats = state.recorder.statistics_since_last_payout(Utc::now())?;
    Ok(Json(StatsResponse {
        stats,
        active_tunnels: state.registry.count(),
    }))
}

pub async fn metrics(State(state): State<ApiState>) -> ApiResult<Response> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {}", e)))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    uptime_secs: u64,
}

pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
