//! Shared types for the worker fleet
//!
//! Contains only what crosses a process boundary: identifiers, the
//! desired-state record, the gateway routing file and the heartbeat line
//! format that workers write and the orchestrator parses.

pub mod errors;
pub mod heartbeat;
pub mod logging;
pub mod routes;
pub mod types;

pub use errors::*;
pub use heartbeat::{format_heartbeat_line, last_heartbeat_in, parse_heartbeat_line, HeartbeatLine};
pub use routes::{RouteEntry, RouteTable};
pub use types::*;
