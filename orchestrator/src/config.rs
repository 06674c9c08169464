//! Fleet-wide settings
//!
//! Built once from the command line (see `main.rs`) and handed to every
//! component by value or behind an `Arc`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use shared::WorkerId;

use crate::core::heartbeat::HeartbeatPolicy;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Default launch command; placeholders are substituted per worker
pub const DEFAULT_WORKER_COMMAND: &str = "freqtrade trade --config {config} --logfile {logfile}";

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub base_port: u16,
    pub max_port: u16,
    pub max_workers: usize,
    pub data_dir: PathBuf,
    pub strategies_dir: PathBuf,
    pub worker_command: String,
    pub startup_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub probe_timeout: Duration,
    pub stop_grace: Duration,
    pub graceful_stop_timeout: Duration,
    pub webhook_base_url: String,
    pub cors_origins: Vec<String>,
    pub gateway_url: Option<String>,
    pub proxies: HashMap<u32, String>,
    pub auto_recover: bool,
    pub recovery_retries: u32,
    pub recovery_delay: Duration,
    pub heartbeat_defaults: HeartbeatPolicy,
    pub notify_recipient: String,
    pub notify_webhook: Option<String>,
    pub capacity_alert_percent: f64,
    pub capacity_check_interval: Duration,
    pub health_sweep_interval: Duration,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            base_port: 8081,
            max_port: 9080,
            max_workers: 1000,
            data_dir: PathBuf::from("./data"),
            strategies_dir: PathBuf::from("./user_data/strategies"),
            worker_command: DEFAULT_WORKER_COMMAND.to_string(),
            startup_timeout: Duration::from_secs(60),
            readiness_poll_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(30),
            graceful_stop_timeout: Duration::from_secs(30),
            webhook_base_url: "http://localhost:8000/api/v1/signals/webhook".to_string(),
            cors_origins: vec![
                "http://localhost:8000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            gateway_url: None,
            proxies: HashMap::new(),
            auto_recover: true,
            recovery_retries: 3,
            recovery_delay: Duration::from_secs(2),
            heartbeat_defaults: HeartbeatPolicy::default(),
            notify_recipient: "admin".to_string(),
            notify_webhook: None,
            capacity_alert_percent: 80.0,
            capacity_check_interval: Duration::from_secs(300),
            health_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl FleetSettings {
    /// Reject settings the fleet cannot run with
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.base_port == 0 || self.base_port > self.max_port {
            return Err(OrchestratorError::config(
                "port_range",
                format!("{}..={} is empty", self.base_port, self.max_port),
            ));
        }
        if self.max_workers == 0 {
            return Err(OrchestratorError::config("max_workers", "must be at least 1"));
        }
        if self.worker_command.split_whitespace().next().is_none() {
            return Err(OrchestratorError::config("worker_command", "is empty"));
        }
        Ok(())
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.data_dir.join("configs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn routes_path(&self) -> PathBuf {
        self.data_dir.join("gateway_routes.json")
    }

    pub fn config_path(&self, worker_id: WorkerId) -> PathBuf {
        self.configs_dir().join(config_file_name(worker_id))
    }

    pub fn log_path(&self, worker_id: WorkerId) -> PathBuf {
        self.logs_dir().join(format!("strategy_{worker_id}.log"))
    }

    /// Create the working directories; failures degrade but do not abort
    pub async fn ensure_dirs(&self) -> Vec<(PathBuf, std::io::Error)> {
        let mut failures = Vec::new();
        for dir in [self.configs_dir(), self.logs_dir(), self.state_dir()] {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                failures.push((dir, e));
            }
        }
        failures
    }
}

/// File name of a worker's rendered configuration
pub fn config_file_name(worker_id: WorkerId) -> String {
    format!("strategy_{worker_id}.json")
}

/// Parse a `--proxy <id>=<url>` argument
pub fn parse_proxy_arg(raw: &str) -> Result<(u32, String), String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <id>=<url>, got '{raw}'"))?;
    let id = id
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid proxy id '{id}': {e}"))?;
    let url = url.trim();
    if url.is_empty() {
        return Err(format!("proxy {id} has an empty url"));
    }
    Ok((id, url.to_string()))
}
