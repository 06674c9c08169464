//! Gateway-specific error types
//!
//! Each variant maps to the HTTP status a caller sees, so clients can tell
//! a missing route from an unreachable worker from a broken gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use shared::{SharedError, WorkerId};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Strategy {worker_id} not found")]
    RouteNotFound { worker_id: WorkerId },

    #[error("Upstream {upstream} unavailable: {message}")]
    UpstreamUnavailable { upstream: String, message: String },

    #[error("Upstream {upstream} did not answer within {timeout:?}")]
    UpstreamTimeout { upstream: String, timeout: Duration },

    #[error("Unsupported method: {method}")]
    InvalidMethod { method: String },

    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {field}: {message}")]
    ConfigError { field: String, message: String },

    #[error("Response building error: {0}")]
    ResponseError(String),

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable { .. } | Self::UpstreamTimeout { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidMethod { .. } => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
