//! Main gateway implementation
//!
//! One externally reachable listener in front of every worker API. The
//! routing table is loaded from the durable routes file the orchestrator
//! writes, so the gateway can restart on its own and resume routing.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{Json, Response},
    routing::{any, get, post},
    Router,
};
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use shared::{process_debug, process_info, process_warn, ProcessId, WorkerId};

use crate::config::GatewaySettings;
use crate::error::{GatewayError, GatewayResult};
use crate::state::GatewayState;
use crate::traits::{RouteSource, Upstream};
use crate::types::{is_hop_by_hop, ForwardRequest, ForwardResponse, GatewayHealth, StrategyStatus};

/// Reverse-proxy gateway with dependency injection
pub struct Gateway<R, U>
where
    R: RouteSource,
    U: Upstream,
{
    settings: Arc<GatewaySettings>,
    state: Arc<GatewayState>,
    route_source: Arc<R>,
    upstream: Arc<U>,

    /// Shutdown signal
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl<R: RouteSource, U: Upstream> Clone for Gateway<R, U> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            state: Arc::clone(&self.state),
            route_source: Arc::clone(&self.route_source),
            upstream: Arc::clone(&self.upstream),
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_rx: Arc::clone(&self.shutdown_rx),
        }
    }
}

impl<R, U> Gateway<R, U>
where
    R: RouteSource + 'static,
    U: Upstream + 'static,
{
    /// Create a new gateway with an empty routing table
    pub fn new(settings: GatewaySettings, route_source: R, upstream: U) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            settings: Arc::new(settings),
            state: Arc::new(GatewayState::new()),
            route_source: Arc::new(route_source),
            upstream: Arc::new(upstream),
            shutdown_tx,
            shutdown_rx: Arc::new(Mutex::new(shutdown_rx)),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Rebuild the routing table from its durable source
    ///
    /// On failure the previous table stays in place.
    pub async fn reload_routes(&self) -> GatewayResult<usize> {
        let table = self.route_source.load().await?;
        let count = self.state.replace(table);
        process_info!(ProcessId::current(), "🗺️ Reloaded {} route(s)", count);
        Ok(count)
    }

    /// Forward a request to the worker registered under `worker_id`
    pub async fn route_to(&self, worker_id: WorkerId, request: ForwardRequest) -> GatewayResult<ForwardResponse> {
        let entry = self
            .state
            .lookup(worker_id)
            .ok_or(GatewayError::RouteNotFound { worker_id })?;

        process_debug!(
            ProcessId::current(),
            "➡️ {} /api/v1/{} -> worker {} ({})",
            request.method,
            request.path,
            worker_id,
            entry.upstream
        );

        match self.upstream.forward(&entry.upstream, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Worker {} upstream failed: {}", worker_id, e);
                Err(e)
            }
        }
    }

    /// Probe every route's status endpoint concurrently
    pub async fn aggregate_status(&self) -> BTreeMap<WorkerId, StrategyStatus> {
        let routes = self.state.routes();
        let probes = routes.iter().map(|(worker_id, entry)| {
            let upstream = Arc::clone(&self.upstream);
            let worker_id = *worker_id;
            let address = entry.upstream.clone();
            async move {
                let probe = upstream.status(&address).await;
                (worker_id, StrategyStatus::from_probe(&address, probe))
            }
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Probe every route's health-check URL concurrently and score the fleet
    pub async fn health_check(&self) -> GatewayHealth {
        let routes = self.state.routes();
        let checks = routes.iter().map(|(_, entry)| {
            let upstream = Arc::clone(&self.upstream);
            let url = entry.health_check.clone();
            async move { upstream.health(&url).await }
        });

        let healthy = join_all(checks).await.into_iter().filter(|ok| *ok).count();
        let health = GatewayHealth::compute(healthy, routes.len(), self.settings.degraded_threshold);
        if health.is_degraded() {
            process_warn!(
                ProcessId::current(),
                "⚠️ Gateway degraded: {}/{} workers healthy ({}%)",
                health.healthy_count,
                health.total_count,
                health.health_score
            );
        }
        health
    }

    /// Build the Axum router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            // Worker API passthrough
            .route("/api/strategy/:worker_id/*path", any(proxy_handler::<R, U>))
            // Fleet views
            .route("/api/strategies/status", get(status_handler::<R, U>))
            .route("/api/gateway/health", get(gateway_health_handler::<R, U>))
            .route("/api/gateway/routes/reload", post(reload_handler::<R, U>))
            // Liveness of the gateway itself
            .route("/health", get(health_handler::<R, U>))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive())
                    .into_inner(),
            )
            .with_state(self.clone())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> GatewayResult<()> {
        let addr = self.settings.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::BindFailed { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> GatewayResult<()> {
        let local = listener.local_addr()?;
        process_info!(
            ProcessId::current(),
            "🌐 Gateway listening on http://{} ({} routes)",
            local,
            self.state.route_count()
        );

        let shutdown_rx = Arc::clone(&self.shutdown_rx);
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                shutdown_rx.lock().await.recv().await;
                process_debug!(ProcessId::current(), "🛑 Shutting down gateway...");
            })
            .await?;

        Ok(())
    }

    /// Get shutdown sender for external shutdown requests
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }
}

fn forward_request(method: &Method, path: String, uri: &Uri, headers: &HeaderMap, body: Bytes) -> ForwardRequest {
    ForwardRequest {
        method: method.as_str().to_string(),
        path,
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect(),
        body: body.to_vec(),
    }
}

fn into_http_response(forwarded: ForwardResponse) -> GatewayResult<Response> {
    let status =
        StatusCode::from_u16(forwarded.status).map_err(|e| GatewayError::ResponseError(e.to_string()))?;

    let mut response = Response::builder().status(status);
    for (name, value) in forwarded.headers.iter().filter(|(name, _)| !is_hop_by_hop(name)) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_bytes(value)) {
            response = response.header(name, value);
        }
    }

    response
        .body(Body::from(forwarded.body))
        .map_err(|e| GatewayError::ResponseError(e.to_string()))
}

// HTTP Handlers

/// Forward `/api/strategy/{id}/{path}` to the worker's `/api/v1/{path}`
async fn proxy_handler<R, U>(
    State(gateway): State<Gateway<R, U>>,
    Path((worker_id, path)): Path<(u32, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError>
where
    R: RouteSource + 'static,
    U: Upstream + 'static,
{
    let request = forward_request(&method, path, &uri, &headers, body);
    let forwarded = gateway.route_to(WorkerId(worker_id), request).await?;
    into_http_response(forwarded)
}

/// Status of every routed worker
async fn status_handler<R, U>(State(gateway): State<Gateway<R, U>>) -> Json<Value>
where
    R: RouteSource + 'static,
    U: Upstream + 'static,
{
    let strategies = gateway.aggregate_status().await;
    Json(json!({
        "gateway_status": "running",
        "total_strategies": strategies.len(),
        "strategies": strategies,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn gateway_health_handler<R, U>(State(gateway): State<Gateway<R, U>>) -> Json<GatewayHealth>
where
    R: RouteSource + 'static,
    U: Upstream + 'static,
{
    Json(gateway.health_check().await)
}

async fn reload_handler<R, U>(State(gateway): State<Gateway<R, U>>) -> Result<Json<Value>, GatewayError>
where
    R: RouteSource + 'static,
    U: Upstream + 'static,
{
    let count = gateway.reload_routes().await?;
    Ok(Json(json!({
        "status": "success",
        "routes_count": count,
        "message": "Routes configuration reloaded",
    })))
}

/// Health check endpoint
async fn health_handler<R, U>(State(gateway): State<Gateway<R, U>>) -> Json<Value>
where
    R: RouteSource + 'static,
    U: Upstream + 'static,
{
    Json(json!({
        "status": "healthy",
        "uptime": gateway.state().uptime_seconds(),
        "routes": gateway.state().route_count(),
        "reloads": gateway.state().reload_count(),
    }))
}
