//! HTTP probe against a worker's local API

use std::time::Duration;

use shared::routes::{PING_PATH, WORKER_HOST};
use shared::{process_debug, ProcessId};

use crate::traits::WorkerProbe;

const STOP_PATH: &str = "/api/v1/stop";

pub struct HttpWorkerProbe {
    client: reqwest::Client,
    ping_timeout: Duration,
    stop_timeout: Duration,
}

impl HttpWorkerProbe {
    pub fn new(ping_timeout: Duration, stop_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            ping_timeout,
            stop_timeout,
        }
    }

    fn url(port: u16, path: &str) -> String {
        format!("http://{WORKER_HOST}:{port}{path}")
    }
}

impl Default for HttpWorkerProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }
}

#[async_trait::async_trait]
impl WorkerProbe for HttpWorkerProbe {
    async fn ping(&self, port: u16) -> bool {
        match self
            .client
            .get(Self::url(port, PING_PATH))
            .timeout(self.ping_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    async fn request_stop(&self, port: u16) -> bool {
        match self
            .client
            .post(Self::url(port, STOP_PATH))
            .timeout(self.stop_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                process_debug!(ProcessId::current(), "Graceful stop on port {} failed: {}", port, e);
                false
            }
        }
    }
}
