//! Tests for the worker stub over a real socket

use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

use shared::last_heartbeat_in;
use worker_stub::{load_worker_config, WorkerStub, STATE_RUNNING, STATE_STOPPED};

async fn write_config(dir: &TempDir, id: u32, port: u16) -> std::path::PathBuf {
    let path = dir.path().join(format!("strategy_{id}.json"));
    let document = serde_json::json!({
        "strategy": "SampleStrategy",
        "api_server": { "listen_ip_address": "127.0.0.1", "listen_port": port },
        "webhook": { "strategy_version": "2.0" },
    });
    tokio::fs::write(&path, document.to_string()).await.unwrap();
    path
}

/// Test the stub heartbeats while running and exits on POST /api/v1/stop
#[tokio::test]
async fn test_serve_heartbeat_and_stop() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config_path = write_config(&dir, 3, addr.port()).await;
    let log_path = dir.path().join("strategy_3.log");

    let config = load_worker_config(&config_path).await.unwrap();
    assert_eq!(config.worker_id, 3);
    let stub = WorkerStub::new(config, log_path.clone()).with_heartbeat_interval(Duration::from_millis(50));

    let server = {
        let stub = stub.clone();
        tokio::spawn(async move { stub.serve(listener).await })
    };

    let ping = reqwest::get(format!("http://{addr}/api/v1/ping")).await.unwrap();
    assert_eq!(ping.status().as_u16(), 200);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let text = tokio::fs::read_to_string(&log_path).await.unwrap();
    assert!(text.lines().count() >= 2, "heartbeats accumulate: {text}");
    assert_eq!(last_heartbeat_in(&text).unwrap().state, STATE_RUNNING);

    let stop = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(stop.status().as_u16(), 200);

    let result = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(result.is_ok());

    let text = tokio::fs::read_to_string(&log_path).await.unwrap();
    let last = last_heartbeat_in(&text).unwrap();
    assert_eq!(last.state, STATE_STOPPED);
    assert_eq!(last.version, "2.0");
}
