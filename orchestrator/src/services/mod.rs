//! Service implementations
//!
//! This module contains the production implementations of the collaborator
//! traits together with the worker lifecycle manager that drives them.

pub mod credentials;
pub mod notifier;
pub mod probe;
pub mod process_inspector;
pub mod process_manager;
pub mod proxy;
pub mod route_publisher;
pub mod state_store;
pub mod worker_config;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use credentials::EnvCredentialSource;
pub use notifier::{TracingNotifier, WebhookNotifier};
pub use probe::HttpWorkerProbe;
pub use process_inspector::SystemProcessInspector;
pub use process_manager::WorkerManager;
pub use proxy::StaticProxyResolver;
pub use route_publisher::FileRoutePublisher;
pub use state_store::JsonStateStore;
