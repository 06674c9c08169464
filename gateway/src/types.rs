//! Gateway request/response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Headers that describe a single connection and are never forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Client-independent view of a request to forward upstream
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRequest {
    pub method: String,
    /// Path below the worker's `/api/v1/`
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardResponse {
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
}

/// Outcome of one worker status probe
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamStatus {
    Healthy(Value),
    HttpError(u16),
    Unreachable(String),
}

/// Per-worker entry of the aggregate status response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub status: String,
    pub upstream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrategyStatus {
    pub fn from_probe(upstream: &str, probe: UpstreamStatus) -> Self {
        let (status, data, error) = match probe {
            UpstreamStatus::Healthy(data) => ("healthy", Some(data), None),
            UpstreamStatus::HttpError(code) => ("error", None, Some(format!("HTTP {code}"))),
            UpstreamStatus::Unreachable(message) => ("unreachable", None, Some(message)),
        };
        Self {
            status: status.to_string(),
            upstream: upstream.to_string(),
            data,
            error,
        }
    }
}

/// Result of probing every route's health-check URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub health_score: f64,
    pub healthy_count: usize,
    pub total_count: usize,
    pub routes_loaded: usize,
}

impl GatewayHealth {
    /// Score is the healthy percentage; an empty table counts as fully healthy
    pub fn compute(healthy_count: usize, total_count: usize, degraded_threshold: f64) -> Self {
        let health_score = if total_count == 0 {
            100.0
        } else {
            let raw = healthy_count as f64 / total_count as f64 * 100.0;
            (raw * 100.0).round() / 100.0
        };
        let status = if health_score >= degraded_threshold {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            health_score,
            healthy_count,
            total_count,
            routes_loaded: total_count,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == "degraded"
    }
}
