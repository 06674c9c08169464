//! Reading the worker configuration document the orchestrator renders

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Version reported in heartbeats when the document carries none
pub const DEFAULT_VERSION: &str = "stub";

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    strategy: String,
    api_server: ApiServer,
    #[serde(default)]
    webhook: Option<Webhook>,
}

#[derive(Debug, Deserialize)]
struct ApiServer {
    #[serde(default = "default_listen_ip")]
    listen_ip_address: String,
    listen_port: u16,
}

#[derive(Debug, Deserialize)]
struct Webhook {
    #[serde(default)]
    strategy_version: Option<String>,
}

fn default_listen_ip() -> String {
    shared::routes::WORKER_HOST.to_string()
}

/// What the stub needs out of the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub worker_id: u32,
    pub strategy: String,
    pub listen_ip: String,
    pub port: u16,
    pub version: String,
}

impl WorkerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.port)
    }

    /// Override the port from the document (fluent API)
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}

/// `strategy_<id>.json` -> `<id>`
pub fn worker_id_from_path(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("strategy_")?
        .parse()
        .ok()
}

/// Parse a config document; the worker id comes from the file name
pub fn parse_worker_config(text: &str, worker_id: u32) -> Result<WorkerConfig> {
    let document: ConfigDocument = serde_json::from_str(text).context("invalid worker config document")?;
    let version = document
        .webhook
        .and_then(|w| w.strategy_version)
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());

    Ok(WorkerConfig {
        worker_id,
        strategy: document.strategy,
        listen_ip: document.api_server.listen_ip_address,
        port: document.api_server.listen_port,
        version,
    })
}

pub async fn load_worker_config(path: &Path) -> Result<WorkerConfig> {
    let worker_id = worker_id_from_path(path)
        .ok_or_else(|| anyhow!("config file name must look like strategy_<id>.json: {}", path.display()))?;
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_worker_config(&text, worker_id)
}
