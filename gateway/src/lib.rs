//! Reverse-proxy gateway for the worker fleet
//!
//! A single listener that routes `/api/strategy/{id}/...` to the worker
//! registered under that id, plus aggregate status and health views over
//! the whole routing table.

pub mod config;
pub mod error;
pub mod gateway_impl;
pub mod services;
pub mod state;
pub mod traits;
pub mod types;

// Re-export main types
pub use config::GatewaySettings;
pub use error::{GatewayError, GatewayResult};
pub use gateway_impl::Gateway;
pub use state::GatewayState;
pub use types::*;

// Re-export trait definitions and service implementations
pub use services::{FileRouteSource, HttpUpstream};
pub use traits::{RouteSource, Upstream};
