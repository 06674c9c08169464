//! Orchestrator-specific error types
//!
//! Every failure branch of the fleet manager constructs its own variant, so
//! the operator-facing reason is derived from the variant rather than from
//! the error text.

use serde::{Deserialize, Serialize};
use shared::{SharedError, WorkerId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Fleet at capacity: {max_workers} workers already allocated")]
    CapacityExceeded { max_workers: usize },

    #[error("Port {port} is already bound by another process")]
    PortConflict { port: u16 },

    #[error("Worker {worker_id} did not become ready within {timeout:?}")]
    StartupTimeout { worker_id: WorkerId, timeout: Duration },

    #[error("Worker {worker_id} process exited (code {exit_code:?})")]
    ProcessCrashed {
        worker_id: WorkerId,
        exit_code: Option<i32>,
    },

    #[error("Failed to spawn worker {worker_id}: {source}")]
    SpawnFailed {
        worker_id: WorkerId,
        #[source]
        source: std::io::Error,
    },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Configuration error: {field}: {message}")]
    ConfigError { field: String, message: String },

    #[error("Proxy error for proxy {proxy_id}: {message}")]
    ProxyError { proxy_id: u32, message: String },

    #[error("Recovery of worker {worker_id} failed after {attempts} attempts")]
    RecoveryExhausted { worker_id: WorkerId, attempts: u32 },

    #[error("Worker {worker_id} is already starting or stopping")]
    AlreadyInTransition { worker_id: WorkerId },

    #[error("Worker {worker_id} is not running")]
    NotRunning { worker_id: WorkerId },

    #[error("State store error: {message}")]
    Store { message: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Operator-facing category of this failure
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::CapacityExceeded { .. } => FailureReason::CapacityError,
            Self::PortConflict { .. } => FailureReason::PortConflict,
            Self::StartupTimeout { .. } => FailureReason::ApiTimeout,
            Self::ProcessCrashed { .. } => FailureReason::ProcessExit,
            Self::PermissionDenied { .. } => FailureReason::PermissionError,
            Self::ConfigError { .. } | Self::Json(_) => FailureReason::ConfigError,
            Self::ProxyError { .. } => FailureReason::ProxyError,
            Self::SpawnFailed { source, .. } | Self::Io(source)
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                FailureReason::PermissionError
            }
            other => FailureReason::unknown(&other.to_string()),
        }
    }
}

/// Failure category reported on a worker's record and in start/stop outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    PortConflict,
    ProcessExit,
    ApiTimeout,
    ConfigError,
    ProxyError,
    PermissionError,
    CapacityError,
    Unknown(String),
}

impl FailureReason {
    const UNKNOWN_DETAIL_CHARS: usize = 100;

    pub fn unknown(message: &str) -> Self {
        Self::Unknown(message.chars().take(Self::UNKNOWN_DETAIL_CHARS).collect())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PortConflict => "port_conflict",
            Self::ProcessExit => "process_exit",
            Self::ApiTimeout => "api_timeout",
            Self::ConfigError => "config_error",
            Self::ProxyError => "proxy_error",
            Self::PermissionError => "permission_error",
            Self::CapacityError => "capacity_error",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(detail) => write!(f, "unknown: {detail}"),
            other => f.write_str(other.code()),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
