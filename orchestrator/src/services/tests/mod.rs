//! Service-specific tests
//!
//! Lifecycle tests spawn real OS processes (`sleep`, `false`) with the
//! readiness probe mocked; store tests run against a temporary directory.

mod state_store;

// Common test utilities for services
pub mod common {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::FleetSettings;
    use crate::traits::MockWorkerProbe;

    /// Settings pointing at `data_dir` with fast readiness polling
    pub fn fast_settings(data_dir: &Path, base_port: u16, max_workers: usize) -> FleetSettings {
        FleetSettings {
            base_port,
            max_port: base_port + 49,
            max_workers,
            data_dir: data_dir.to_path_buf(),
            worker_command: "sleep 300".to_string(),
            startup_timeout: Duration::from_millis(400),
            readiness_poll_interval: Duration::from_millis(20),
            stop_grace: Duration::from_secs(3),
            ..FleetSettings::default()
        }
    }

    /// Probe whose readiness answer is fixed and whose stop request always fails
    pub fn probe(ready: bool) -> Arc<MockWorkerProbe> {
        let mut probe = MockWorkerProbe::new();
        probe.expect_ping().returning(move |_| ready);
        probe.expect_request_stop().returning(|_| false);
        Arc::new(probe)
    }
}
