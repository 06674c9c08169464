//! Common test utilities and infrastructure
//!
//! This module provides shared fixtures and builders used by the monitor,
//! recovery and fleet test suites.

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
#[allow(unused_imports)]
pub use fixtures::TestFixtures;
#[allow(unused_imports)]
pub use helpers::{MonitorBuilder, OrchestratorBuilder, TestHelpers};
