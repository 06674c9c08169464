//! Orchestrator library for running a fleet of worker processes
//!
//! This library provides the port pool, worker lifecycle manager, heartbeat
//! monitor and startup recovery behind a single [`Orchestrator`] facade, with
//! every external collaborator injected through a trait.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::FleetSettings;
pub use crate::core::{HeartbeatMonitor, HeartbeatPolicy, PortPool, RecoveryCoordinator, RecoveryReport};
pub use error::{FailureReason, OrchestratorError, OrchestratorResult};
pub use orchestrator::{FleetRestarter, Orchestrator};
pub use services::WorkerManager;
pub use traits::{
    CredentialSource, Notifier, ProcessInspector, ProxyResolver, RoutePublisher, StateStore, WorkerControl,
    WorkerLauncher, WorkerProbe,
};
pub use types::{CapacityInfo, HealthReport, HealthStatus, PortPoolStatus, WorkerInfo, WorkerOutcome};
