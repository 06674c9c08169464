//! Stand-in worker runtime
//!
//! Serves the small slice of the worker API the control plane and gateway
//! touch and keeps appending heartbeat lines to its log file until stopped.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use shared::{format_heartbeat_line, process_debug, process_info, process_warn, ProcessId};

use crate::config::WorkerConfig;

pub const STATE_RUNNING: &str = "RUNNING";
pub const STATE_STOPPED: &str = "STOPPED";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Append one heartbeat line for this process
pub async fn append_heartbeat(log_path: &Path, version: &str, state: &str) -> std::io::Result<()> {
    let line = format_heartbeat_line(Utc::now(), std::process::id(), version, state);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}

pub struct WorkerStub {
    config: Arc<WorkerConfig>,
    log_path: Arc<PathBuf>,
    heartbeat_interval: Duration,
    state: Arc<RwLock<&'static str>>,
    started_at: Instant,

    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl Clone for WorkerStub {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            log_path: Arc::clone(&self.log_path),
            heartbeat_interval: self.heartbeat_interval,
            state: Arc::clone(&self.state),
            started_at: self.started_at,
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_rx: Arc::clone(&self.shutdown_rx),
        }
    }
}

impl WorkerStub {
    pub fn new(config: WorkerConfig, log_path: PathBuf) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            config: Arc::new(config),
            log_path: Arc::new(log_path),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            state: Arc::new(RwLock::new(STATE_RUNNING)),
            started_at: Instant::now(),
            shutdown_tx,
            shutdown_rx: Arc::new(Mutex::new(shutdown_rx)),
        }
    }

    /// Configure heartbeat interval (fluent API)
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> &'static str {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: &'static str) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn heartbeat(&self) {
        if let Err(e) = append_heartbeat(&self.log_path, &self.config.version, self.state()).await {
            process_warn!(
                ProcessId::current(),
                "⚠️ Could not write heartbeat to {}: {}",
                self.log_path.display(),
                e
            );
        }
    }

    /// Flip to STOPPED and ask the server to wind down
    pub async fn request_stop(&self) {
        self.set_state(STATE_STOPPED);
        self.heartbeat().await;
        // a full channel means a stop is already pending
        let _ = self.shutdown_tx.try_send(());
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/api/v1/ping", get(ping_handler))
            .route("/api/v1/status", get(status_handler))
            .route("/api/v1/stop", post(stop_handler))
            .with_state(self.clone())
    }

    /// Bind the configured address and serve until stopped
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding worker API on {addr}"))?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        process_info!(
            ProcessId::current(),
            "🤖 Worker {} ({}) listening on http://{}",
            self.config.worker_id,
            self.config.strategy,
            listener.local_addr()?
        );

        let heartbeats = {
            let stub = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(stub.heartbeat_interval);
                loop {
                    ticker.tick().await;
                    stub.heartbeat().await;
                }
            })
        };

        let shutdown_rx = Arc::clone(&self.shutdown_rx);
        let served = axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                shutdown_rx.lock().await.recv().await;
                process_debug!(ProcessId::current(), "🛑 Worker API shutting down...");
            })
            .await;

        heartbeats.abort();
        if self.state() != STATE_STOPPED {
            self.set_state(STATE_STOPPED);
            self.heartbeat().await;
        }
        served.context("worker API server failed")
    }

    /// Get shutdown sender for external shutdown requests
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }
}

async fn ping_handler() -> Json<Value> {
    Json(json!({ "status": "pong" }))
}

async fn status_handler(State(stub): State<WorkerStub>) -> Json<Value> {
    Json(json!({
        "worker_id": stub.config.worker_id,
        "strategy": stub.config.strategy,
        "state": stub.state().to_lowercase(),
        "pid": std::process::id(),
        "version": stub.config.version,
        "uptime": stub.started_at.elapsed().as_secs(),
    }))
}

async fn stop_handler(State(stub): State<WorkerStub>) -> Json<Value> {
    process_info!(ProcessId::current(), "🛑 Stop requested over the API");
    stub.request_stop().await;
    Json(json!({ "status": "stopping traders ..." }))
}
