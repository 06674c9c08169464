//! Stand-in worker runtime for local fleet runs
//!
//! Reads the configuration document the orchestrator renders, serves the
//! ping/status/stop endpoints and writes heartbeat lines in the format the
//! heartbeat monitor parses.

pub mod config;
pub mod stub;

pub use config::{load_worker_config, parse_worker_config, worker_id_from_path, WorkerConfig};
pub use stub::{append_heartbeat, WorkerStub, STATE_RUNNING, STATE_STOPPED};
