//! Core fleet logic: port accounting, heartbeat tracking and startup recovery

pub mod heartbeat;
pub mod monitor;
pub mod port_pool;
pub mod recovery;

pub use heartbeat::{HeartbeatPolicy, HeartbeatRecord, HeartbeatState, LogTail, RestartRecord};
pub use monitor::{CheckOutcome, HeartbeatMonitor, HeartbeatStatus, MonitorSummary, RestartDecision};
pub use port_pool::PortPool;
pub use recovery::{RecoveryCoordinator, RecoveryDetail, RecoveryReport};
