//! Common test utilities for gateway tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tower::ServiceExt;

use gateway::{FileRouteSource, Gateway, GatewaySettings, HttpUpstream};
use shared::{RouteTable, WorkerId};

pub struct TestFixtures;

impl TestFixtures {
    pub const WORKER_ID: u32 = 7;

    pub fn settings(routes_path: &Path) -> GatewaySettings {
        GatewaySettings {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            routes_path: routes_path.to_path_buf(),
            proxy_timeout: Duration::from_secs(2),
            health_timeout: Duration::from_secs(1),
            status_timeout: Duration::from_secs(1),
            ..GatewaySettings::default()
        }
    }

    pub fn routes_path(dir: &Path) -> PathBuf {
        dir.join("gateway_routes.json")
    }
}

/// Write a routes file mapping each worker to a local port
pub async fn write_routes(path: &Path, routes: &[(u32, u16)]) {
    RouteTable::from_ports(routes.iter().map(|(id, port)| (WorkerId(*id), *port)))
        .save_atomic(path)
        .await
        .unwrap();
}

/// Gateway over real HTTP with its table loaded from `routes`
pub async fn gateway_with_routes(dir: &Path, routes: &[(u32, u16)]) -> Gateway<FileRouteSource, HttpUpstream> {
    let path = TestFixtures::routes_path(dir);
    write_routes(&path, routes).await;

    let settings = TestFixtures::settings(&path);
    let upstream = HttpUpstream::new(&settings);
    let gateway = Gateway::new(settings, FileRouteSource::new(path), upstream);
    gateway.reload_routes().await.unwrap();
    gateway
}

/// A local port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Drive one request through the router and decode the JSON body
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}
