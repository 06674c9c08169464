//! Durable routing-table publisher
//!
//! Writes the gateway's routes file atomically and, when a gateway URL is
//! configured, nudges the gateway to reload it. The nudge is best effort;
//! the file is the contract.

use std::path::PathBuf;
use std::time::Duration;

use shared::{process_debug, process_warn, ProcessId, RouteTable};

use crate::error::OrchestratorResult;
use crate::traits::RoutePublisher;

pub const RELOAD_PATH: &str = "/api/gateway/routes/reload";

pub struct FileRoutePublisher {
    path: PathBuf,
    gateway_url: Option<String>,
    client: reqwest::Client,
    reload_timeout: Duration,
}

impl FileRoutePublisher {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            gateway_url: None,
            client: reqwest::Client::new(),
            reload_timeout: Duration::from_secs(5),
        }
    }

    /// Configure gateway to notify after each publish (fluent API)
    pub fn with_gateway_url(mut self, gateway_url: Option<String>) -> Self {
        self.gateway_url = gateway_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait::async_trait]
impl RoutePublisher for FileRoutePublisher {
    async fn publish(&self, table: &RouteTable) -> OrchestratorResult<()> {
        table.save_atomic(&self.path).await?;
        process_debug!(
            ProcessId::current(),
            "🗺️ Published {} route(s) to {}",
            table.len(),
            self.path.display()
        );

        if let Some(gateway_url) = &self.gateway_url {
            let url = format!("{gateway_url}{RELOAD_PATH}");
            let result = self.client.post(&url).timeout(self.reload_timeout).send().await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Gateway reload returned HTTP {}",
                        response.status()
                    );
                }
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Gateway reload request failed: {}", e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::WorkerId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_writes_routes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway_routes.json");
        let publisher = FileRoutePublisher::new(path.clone());

        let table = RouteTable::from_ports([(WorkerId(7), 8088)]);
        publisher.publish(&table).await.unwrap();

        assert_eq!(RouteTable::load(&path).await.unwrap(), table);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let publisher = FileRoutePublisher::new(dir.path().join("routes.json"))
            .with_gateway_url(Some("http://127.0.0.1:1/".to_string()));

        publisher.publish(&RouteTable::new()).await.unwrap();
    }
}
