//! Worker lifecycle manager
//!
//! Owns the port pool, the worker-handle table and the routing table. Each of
//! the three sits behind its own lock: the pool and the routing table behind
//! short synchronous locks, the handle table behind an async mutex that is
//! never held across a readiness poll or a stop.
//!
//! A worker in transition holds a [`PortLease`]: a start from port allocation
//! until the worker is registered, a stop from handle removal until the
//! process is gone. Dropping the lease (error return, early exit or a
//! cancelled future) kills the process group and returns the port.

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use shared::{
    process_debug, process_error, process_info, process_warn, ProcessId, RouteTable, WorkerId, WorkerSpec,
};

use crate::config::FleetSettings;
use crate::core::port_pool::PortPool;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::credentials::EnvCredentialSource;
use crate::services::process_inspector::{self, SystemProcessInspector};
use crate::services::proxy::StaticProxyResolver;
use crate::services::route_publisher::FileRoutePublisher;
use crate::services::worker_config::{render_worker_config, write_worker_config};
use crate::traits::{CredentialSource, ProcessInspector, ProxyResolver, RoutePublisher, WorkerProbe};
use crate::types::{percent, CapacityInfo, HealthReport, HealthStatus, PortPoolStatus, WorkerInfo};

/// Handle for a registered worker
struct WorkerHandle {
    spec: WorkerSpec,
    info: WorkerInfo,
    child: Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Starting,
    Stopping,
}

type TransitionMap = Arc<StdMutex<HashMap<WorkerId, Transition>>>;

/// Marks a worker as starting or stopping for as long as it is alive
struct TransitionGuard {
    transitions: TransitionMap,
    worker_id: WorkerId,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        let mut transitions = self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        transitions.remove(&self.worker_id);
    }
}

/// Port and process group of a worker in transition
struct PortLease {
    pool: Arc<StdMutex<PortPool>>,
    port: u16,
    pid: Option<u32>,
    committed: bool,
}

impl PortLease {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(pid) = self.pid {
            process_inspector::kill_group(pid);
        }
        let mut pool = self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pool.release(self.port);
    }
}

pub struct WorkerManager<P: WorkerProbe> {
    settings: FleetSettings,
    pool: Arc<StdMutex<PortPool>>,
    handles: Mutex<HashMap<WorkerId, WorkerHandle>>,
    routes: StdRwLock<RouteTable>,
    /// Serialises rebuild + publish so an older table never overwrites a newer one
    publish_lock: Mutex<()>,
    transitions: TransitionMap,
    probe: Arc<P>,
    proxies: Arc<dyn ProxyResolver>,
    credentials: Arc<dyn CredentialSource>,
    publisher: Arc<dyn RoutePublisher>,
    inspector: Arc<dyn ProcessInspector>,
}

impl<P: WorkerProbe + 'static> WorkerManager<P> {
    /// Create a manager with the production collaborators derived from `settings`
    pub fn new(settings: FleetSettings, probe: Arc<P>) -> Self {
        let pool = PortPool::new(settings.base_port, settings.max_port, settings.max_workers);
        let publisher = FileRoutePublisher::new(settings.routes_path()).with_gateway_url(settings.gateway_url.clone());

        Self {
            pool: Arc::new(StdMutex::new(pool)),
            handles: Mutex::new(HashMap::new()),
            routes: StdRwLock::new(RouteTable::new()),
            publish_lock: Mutex::new(()),
            transitions: Arc::new(StdMutex::new(HashMap::new())),
            probe,
            proxies: Arc::new(StaticProxyResolver::new(settings.proxies.clone())),
            credentials: Arc::new(EnvCredentialSource::new()),
            publisher: Arc::new(publisher),
            inspector: Arc::new(SystemProcessInspector::new()),
            settings,
        }
    }

    /// Configure proxy resolver (fluent API)
    pub fn with_proxy_resolver(mut self, proxies: Arc<dyn ProxyResolver>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Configure credential source (fluent API)
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Configure route publisher (fluent API)
    pub fn with_route_publisher(mut self, publisher: Arc<dyn RoutePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Configure process inspector (fluent API)
    pub fn with_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    /// Start a worker and wait until it answers its readiness endpoint
    ///
    /// Starting a worker that is already alive returns its current info.
    pub async fn start(&self, spec: WorkerSpec) -> OrchestratorResult<WorkerInfo> {
        let worker_id = spec.id;

        if let Some(info) = self.live_info(worker_id).await {
            process_debug!(ProcessId::current(), "Worker {} already running on port {}", worker_id, info.port);
            return Ok(info);
        }

        let _transition = self.begin(worker_id, Transition::Starting)?;
        let mut lease = self.lease_port(worker_id)?;
        let port = lease.port;

        let config_path = self.settings.config_path(worker_id);
        let log_path = self.settings.log_path(worker_id);

        let credentials = self.credentials.credentials(&spec.exchange, spec.dry_run).await?;
        let proxy = self.proxies.resolve(spec.proxy_id).await?;
        let document = render_worker_config(&spec, port, &credentials, proxy.as_deref(), &self.settings);
        write_worker_config(&config_path, &document)
            .await
            .map_err(|e| OrchestratorError::config("config_path", e.to_string()))?;

        let mut child = self.spawn_worker(worker_id, port, &config_path, &log_path).await?;
        lease.pid = child.id();

        process_info!(
            ProcessId::current(),
            "🚀 Spawned worker {} (PID: {:?}) on port {}",
            worker_id,
            lease.pid,
            port
        );

        if let Err(e) = self.wait_ready(worker_id, port, &mut child).await {
            process_warn!(ProcessId::current(), "❌ Worker {} failed to start: {}", worker_id, e);
            let _ = child.start_kill();
            return Err(e);
        }
        if let Some(pid) = lease.pid {
            self.inspector.prime(pid);
        }

        let info = WorkerInfo {
            worker_id,
            port,
            pid: lease.pid,
            config_path,
            log_path,
            started_at: Utc::now(),
        };
        {
            let mut handles = self.handles.lock().await;
            handles.insert(
                worker_id,
                WorkerHandle {
                    spec,
                    info: info.clone(),
                    child,
                },
            );
            lease.commit();
        }
        self.refresh_routes().await;

        process_info!(ProcessId::current(), "✅ Worker {} ready on port {}", worker_id, port);
        Ok(info)
    }

    /// Stop a worker: graceful request, SIGTERM, then SIGKILL after the grace period
    ///
    /// Stopping an unknown worker succeeds.
    pub async fn stop(&self, worker_id: WorkerId) -> OrchestratorResult<()> {
        let _transition = self.begin(worker_id, Transition::Stopping)?;

        let handle = self.handles.lock().await.remove(&worker_id);
        let Some(mut handle) = handle else {
            process_debug!(ProcessId::current(), "Worker {} not running, nothing to stop", worker_id);
            return Ok(());
        };

        let mut lease = PortLease {
            pool: Arc::clone(&self.pool),
            port: handle.info.port,
            pid: handle.info.pid,
            committed: false,
        };
        self.shutdown_process(&mut handle).await;
        // reaped: the group id may be reused from here on
        lease.pid = None;
        drop(lease);
        self.refresh_routes().await;

        process_info!(ProcessId::current(), "🛑 Stopped worker {}", worker_id);
        Ok(())
    }

    /// Stop then start with `spec`
    pub async fn restart(&self, spec: WorkerSpec) -> OrchestratorResult<WorkerInfo> {
        self.stop(spec.id).await?;
        self.start(spec).await
    }

    /// Stop every registered worker concurrently
    pub async fn stop_all(&self) {
        let ids = self.worker_ids().await;
        if ids.is_empty() {
            return;
        }

        let results = join_all(ids.iter().map(|id| self.stop(*id))).await;
        for (worker_id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                process_error!(ProcessId::current(), "⚠️ Failed to stop worker {}: {}", worker_id, e);
            }
        }
        process_info!(ProcessId::current(), "🛑 All {} worker(s) stopped", ids.len());
    }

    /// Process liveness, then readiness endpoint, then OS resource snapshot
    pub async fn check_health(&self, worker_id: WorkerId) -> HealthReport {
        let (port, pid) = {
            let mut handles = self.handles.lock().await;
            let Some(handle) = handles.get_mut(&worker_id) else {
                return HealthReport::new(worker_id, HealthStatus::NotRunning);
            };

            match handle.child.try_wait() {
                Ok(None) => (handle.info.port, handle.info.pid),
                Ok(Some(status)) => {
                    let mut report = HealthReport::new(worker_id, HealthStatus::ProcessDead);
                    report.port = Some(handle.info.port);
                    report.pid = handle.info.pid;
                    report.exit_code = status.code();
                    return report;
                }
                Err(e) => {
                    process_warn!(ProcessId::current(), "Cannot wait on worker {}: {}", worker_id, e);
                    let mut report = HealthReport::new(worker_id, HealthStatus::ProcessInaccessible);
                    report.port = Some(handle.info.port);
                    report.pid = handle.info.pid;
                    return report;
                }
            }
        };

        let mut report = HealthReport::new(worker_id, HealthStatus::Healthy);
        report.port = Some(port);
        report.pid = pid;

        if !self.probe.ping(port).await {
            report.status = HealthStatus::ApiUnhealthy;
            return report;
        }

        match pid.and_then(|pid| self.inspector.snapshot(pid)) {
            Some(resources) => report.resources = Some(resources),
            None => report.status = HealthStatus::ProcessInaccessible,
        }
        report
    }

    /// Drop the handle of a worker whose process has exited, freeing its port and route
    pub async fn discard_dead(&self, worker_id: WorkerId) -> Option<WorkerInfo> {
        let handle = {
            let mut handles = self.handles.lock().await;
            let exited = match handles.get_mut(&worker_id) {
                Some(handle) => matches!(handle.child.try_wait(), Ok(Some(_))),
                None => false,
            };
            if !exited {
                return None;
            }
            handles.remove(&worker_id)
        }?;

        if let Some(pid) = handle.info.pid {
            process_inspector::kill_group(pid);
        }
        self.release_port(handle.info.port);
        self.refresh_routes().await;
        process_warn!(ProcessId::current(), "🧹 Discarded dead worker {}", worker_id);
        Some(handle.info)
    }

    pub async fn capacity_info(&self) -> CapacityInfo {
        let running = self.handles.lock().await.len();
        let pool = self.pool_guard();
        let max_workers = pool.max_workers();
        let counts = pool.counts();
        let available_slots = max_workers.saturating_sub(counts.allocated).min(counts.available);

        CapacityInfo {
            max_workers,
            running_workers: running,
            available_slots,
            utilization_percent: percent(running, max_workers),
            port_range: pool.port_range(),
            can_start_more: available_slots > 0,
        }
    }

    pub async fn port_pool_status(&self) -> PortPoolStatus {
        let running = self.handles.lock().await.len();
        let pool = self.pool_guard();
        let counts = pool.counts();

        PortPoolStatus {
            total_ports: counts.total_ports,
            available: counts.available,
            allocated: counts.allocated,
            running_workers: running,
            port_range: pool.port_range(),
            utilization_percent: pool.utilization_percent(),
        }
    }

    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.handles.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn info(&self, worker_id: WorkerId) -> Option<WorkerInfo> {
        self.handles.lock().await.get(&worker_id).map(|h| h.info.clone())
    }

    pub async fn spec(&self, worker_id: WorkerId) -> Option<WorkerSpec> {
        self.handles.lock().await.get(&worker_id).map(|h| h.spec.clone())
    }

    pub async fn pid(&self, worker_id: WorkerId) -> Option<u32> {
        self.info(worker_id).await.and_then(|info| info.pid)
    }

    pub async fn port(&self, worker_id: WorkerId) -> Option<u16> {
        self.info(worker_id).await.map(|info| info.port)
    }

    pub async fn is_running(&self, worker_id: WorkerId) -> bool {
        self.handles.lock().await.contains_key(&worker_id)
    }

    /// Snapshot of the routing table as last published
    pub fn routes(&self) -> RouteTable {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn is_stopping(&self, worker_id: WorkerId) -> bool {
        let transitions = self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        transitions.get(&worker_id) == Some(&Transition::Stopping)
    }

    fn begin(&self, worker_id: WorkerId, kind: Transition) -> OrchestratorResult<TransitionGuard> {
        let mut transitions = self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if transitions.contains_key(&worker_id) {
            return Err(OrchestratorError::AlreadyInTransition { worker_id });
        }
        transitions.insert(worker_id, kind);
        Ok(TransitionGuard {
            transitions: Arc::clone(&self.transitions),
            worker_id,
        })
    }

    fn pool_guard(&self) -> std::sync::MutexGuard<'_, PortPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lease_port(&self, worker_id: WorkerId) -> OrchestratorResult<PortLease> {
        let port = self.pool_guard().allocate_where(worker_id, port_is_bindable)?;
        process_debug!(ProcessId::current(), "Allocated port {} to worker {}", port, worker_id);
        Ok(PortLease {
            pool: Arc::clone(&self.pool),
            port,
            pid: None,
            committed: false,
        })
    }

    fn release_port(&self, port: u16) {
        self.pool_guard().release(port);
    }

    /// Info of a registered worker whose process is still alive; a dead one is dropped
    async fn live_info(&self, worker_id: WorkerId) -> Option<WorkerInfo> {
        let dead = {
            let mut handles = self.handles.lock().await;
            let handle = handles.get_mut(&worker_id)?;
            if let Ok(None) = handle.child.try_wait() {
                return Some(handle.info.clone());
            }
            handles.remove(&worker_id)
        };

        if let Some(handle) = dead {
            process_warn!(
                ProcessId::current(),
                "Worker {} was registered but its process is gone; cleaning up",
                worker_id
            );
            self.release_port(handle.info.port);
            self.refresh_routes().await;
        }
        None
    }

    async fn spawn_worker(
        &self,
        worker_id: WorkerId,
        port: u16,
        config_path: &Path,
        log_path: &Path,
    ) -> OrchestratorResult<Child> {
        let argv = expand_command(&self.settings.worker_command, worker_id, port, config_path, log_path);
        let Some((program, args)) = argv.split_first() else {
            return Err(OrchestratorError::config("worker_command", "is empty"));
        };

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let log = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);

        // own process group so signals to the control plane do not reach workers
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => OrchestratorError::PermissionDenied {
                message: format!("{program}: {e}"),
            },
            _ => OrchestratorError::SpawnFailed { worker_id, source: e },
        })
    }

    async fn wait_ready(&self, worker_id: WorkerId, port: u16, child: &mut Child) -> OrchestratorResult<()> {
        let deadline = Instant::now() + self.settings.startup_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(OrchestratorError::ProcessCrashed {
                    worker_id,
                    exit_code: status.code(),
                });
            }
            if self.probe.ping(port).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::StartupTimeout {
                    worker_id,
                    timeout: self.settings.startup_timeout,
                });
            }
            sleep(self.settings.readiness_poll_interval).await;
        }
    }

    async fn shutdown_process(&self, handle: &mut WorkerHandle) {
        let worker_id = handle.info.worker_id;

        if !self.probe.request_stop(handle.info.port).await {
            process_debug!(ProcessId::current(), "Graceful stop request to worker {} failed", worker_id);
        }
        if let Some(pid) = handle.info.pid {
            process_inspector::terminate_group(pid);
        }

        match timeout(self.settings.stop_grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                process_debug!(ProcessId::current(), "Worker {} exited with {}", worker_id, status);
            }
            Ok(Err(e)) => {
                process_warn!(ProcessId::current(), "Could not wait on worker {}: {}", worker_id, e);
            }
            Err(_) => {
                process_warn!(
                    ProcessId::current(),
                    "🔨 Worker {} still alive after {:?}, killing",
                    worker_id,
                    self.settings.stop_grace
                );
                if let Some(pid) = handle.info.pid {
                    process_inspector::kill_group(pid);
                }
                let _ = handle.child.kill().await;
            }
        }
    }

    /// Rebuild the routing table from the registered handles and publish it
    async fn refresh_routes(&self) {
        let _publishing = self.publish_lock.lock().await;

        let table = {
            let handles = self.handles.lock().await;
            RouteTable::from_ports(handles.values().map(|h| (h.info.worker_id, h.info.port)))
        };

        *self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = table.clone();

        if let Err(e) = self.publisher.publish(&table).await {
            process_error!(ProcessId::current(), "⚠️ Failed to publish routing table: {}", e);
        }
    }
}

/// Split the command template and substitute the per-worker placeholders
pub fn expand_command(
    template: &str,
    worker_id: WorkerId,
    port: u16,
    config_path: &Path,
    log_path: &Path,
) -> Vec<String> {
    let config = config_path.to_string_lossy();
    let logfile = log_path.to_string_lossy();
    template
        .split_whitespace()
        .map(|token| {
            token
                .replace("{config}", &config)
                .replace("{logfile}", &logfile)
                .replace("{port}", &port.to_string())
                .replace("{id}", &worker_id.to_string())
        })
        .collect()
}

/// `false` when something outside the pool already listens on `port`
fn port_is_bindable(port: u16) -> bool {
    match std::net::TcpListener::bind((shared::routes::WORKER_HOST, port)) {
        Ok(_) => true,
        Err(e) => {
            process_debug!(ProcessId::current(), "Port {} is not bindable: {}", port, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_expand_command_substitutes_placeholders() {
        let argv = expand_command(
            "worker-stub trade --config {config} --logfile {logfile} --port={port} --tag w{id}",
            WorkerId(7),
            8088,
            &PathBuf::from("/d/configs/strategy_7.json"),
            &PathBuf::from("/d/logs/strategy_7.log"),
        );
        assert_eq!(
            argv,
            vec![
                "worker-stub",
                "trade",
                "--config",
                "/d/configs/strategy_7.json",
                "--logfile",
                "/d/logs/strategy_7.log",
                "--port=8088",
                "--tag",
                "w7",
            ]
        );
    }

    #[test]
    fn test_port_conflict_detected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_bindable(port));
        drop(listener);
        assert!(port_is_bindable(port));
    }
}
