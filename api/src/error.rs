//! API Error Handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::RepositoryError;
use fleet_nodes::FleetError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No capacity: {0}")]
    NoCapacity(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::NoEligibleNode => ApiError::NoCapacity(err.to_string()),
            FleetError::NodeNotFound(id) => ApiError::NodeNotFound(id),
            FleetError::NotWhitelisted(_) => ApiError::Forbidden(err.to_string()),
            FleetError::CapacityReached { .. } => ApiError::NoCapacity(err.to_string()),
            FleetError::InvalidStrategy(_) | FleetError::Whitelist(_) => {
                ApiError::BadRequest(err.to_string())
            }
            FleetError::Repository(e) => e.into(),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ApiError::NodeNotFound(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NoCapacity(msg) => (StatusCode::SERVICE_UNAVAILABLE, "no_capacity", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NodeNotFound(id) => (
                StatusCode::NOT_FOUND,
                "node_not_found",
                format!("Node {} not found", id),
            ),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = Json(json!({
            "error": error_type,
            "message": message,
        }));

        (status, body).into_response()
    }
}
