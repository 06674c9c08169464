//! Main entry point for the orchestrator binary
//!
//! Builds the production services from command-line settings, recovers the
//! fleet recorded as running, then runs until Ctrl+C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use orchestrator::{
    config::{parse_proxy_arg, DEFAULT_WORKER_COMMAND},
    services::{HttpWorkerProbe, JsonStateStore, SystemProcessInspector, TracingNotifier, WebhookNotifier},
    FleetSettings, HeartbeatPolicy, Notifier, Orchestrator, OrchestratorResult, WorkerManager,
};
use shared::{logging, process_debug, process_info, process_warn, ProcessId, WorkerId};

/// Orchestrator for a fleet of trading-strategy worker processes
#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Runs, monitors and recovers a fleet of worker processes")]
pub struct Args {
    /// Tracing endpoint URL
    #[arg(long, env = "FLEET_TRACE_EP")]
    pub trace_ep: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// First port handed to workers
    #[arg(long, env = "FLEET_BASE_PORT", default_value = "8081")]
    pub base_port: u16,

    /// Last port handed to workers (inclusive)
    #[arg(long, env = "FLEET_MAX_PORT", default_value = "9080")]
    pub max_port: u16,

    /// Maximum number of concurrently running workers
    #[arg(long, env = "FLEET_MAX_WORKERS", default_value = "1000")]
    pub max_workers: usize,

    /// Data directory for configs, logs, state and the routes file
    #[arg(long, env = "FLEET_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Strategy sources directory embedded in worker configs
    #[arg(long, env = "FLEET_STRATEGIES_DIR", default_value = "./user_data/strategies")]
    pub strategies_dir: PathBuf,

    /// Worker launch command; {config} {logfile} {port} {id} are substituted
    #[arg(long, env = "FLEET_WORKER_COMMAND", default_value = DEFAULT_WORKER_COMMAND)]
    pub worker_command: String,

    /// Seconds a new worker has to answer its readiness endpoint
    #[arg(long, env = "FLEET_STARTUP_TIMEOUT", default_value = "60")]
    pub startup_timeout: u64,

    /// Seconds between SIGTERM and SIGKILL when stopping a worker
    #[arg(long, env = "FLEET_STOP_GRACE", default_value = "30")]
    pub stop_grace: u64,

    /// Signal webhook base URL embedded in worker configs
    #[arg(long, env = "FLEET_WEBHOOK_BASE_URL", default_value = "http://localhost:8000/api/v1/signals/webhook")]
    pub webhook_base_url: String,

    /// Gateway base URL to notify after each routes update
    #[arg(long, env = "FLEET_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Outbound proxy as <id>=<url>; repeatable
    #[arg(long = "proxy", value_parser = parse_proxy_arg)]
    pub proxies: Vec<(u32, String)>,

    /// Reset running records to stopped instead of recovering them
    #[arg(long, env = "FLEET_NO_RECOVER")]
    pub no_recover: bool,

    /// Start attempts per worker during recovery
    #[arg(long, env = "FLEET_RECOVERY_RETRIES", default_value = "3")]
    pub recovery_retries: u32,

    /// Default heartbeat timeout in seconds
    #[arg(long, env = "FLEET_HEARTBEAT_TIMEOUT", default_value = "300")]
    pub heartbeat_timeout: u64,

    /// Default heartbeat check interval in seconds
    #[arg(long, env = "FLEET_HEARTBEAT_INTERVAL", default_value = "30")]
    pub heartbeat_interval: u64,

    /// Disable automatic restarts on heartbeat timeout by default
    #[arg(long, env = "FLEET_NO_AUTO_RESTART")]
    pub no_auto_restart: bool,

    /// Recipient of fleet notifications
    #[arg(long, env = "FLEET_NOTIFY_RECIPIENT", default_value = "admin")]
    pub notify_recipient: String,

    /// Webhook receiving notifications as JSON (log only when unset)
    #[arg(long, env = "FLEET_NOTIFY_WEBHOOK")]
    pub notify_webhook: Option<String>,

    /// Utilization percentage that triggers a capacity warning
    #[arg(long, env = "FLEET_CAPACITY_ALERT", default_value = "80")]
    pub capacity_alert_percent: f64,
}

impl Args {
    fn into_settings(self) -> FleetSettings {
        let defaults = FleetSettings::default();
        FleetSettings {
            base_port: self.base_port,
            max_port: self.max_port,
            max_workers: self.max_workers,
            data_dir: self.data_dir,
            strategies_dir: self.strategies_dir,
            worker_command: self.worker_command,
            startup_timeout: Duration::from_secs(self.startup_timeout),
            stop_grace: Duration::from_secs(self.stop_grace),
            webhook_base_url: self.webhook_base_url,
            gateway_url: self.gateway_url,
            proxies: self.proxies.into_iter().collect(),
            auto_recover: !self.no_recover,
            recovery_retries: self.recovery_retries,
            heartbeat_defaults: HeartbeatPolicy {
                worker_id: WorkerId(0),
                timeout_secs: self.heartbeat_timeout,
                check_interval_secs: self.heartbeat_interval,
                auto_restart: !self.no_auto_restart,
                ..HeartbeatPolicy::default()
            },
            notify_recipient: self.notify_recipient,
            notify_webhook: self.notify_webhook,
            capacity_alert_percent: self.capacity_alert_percent,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    // .env first so every flag can come from the environment
    dotenv::dotenv().ok();
    let args = Args::parse();

    // Initialize process ID singleton for orchestrator
    ProcessId::init_orchestrator();

    // Initialize tracing with optional endpoint and log level
    let trace_endpoint = args
        .trace_ep
        .as_ref()
        .map(|url| logging::TracingEndpoint::new(url.clone()));
    logging::init_tracing_with_endpoint_and_level(trace_endpoint, Some(&args.log_level));

    let settings = args.into_settings();
    settings.validate()?;
    logging::log_startup(
        ProcessId::current(),
        &format!(
            "fleet orchestrator (ports {}-{}, max {} workers)",
            settings.base_port, settings.max_port, settings.max_workers
        ),
    );

    for (dir, err) in settings.ensure_dirs().await {
        process_warn!(
            ProcessId::current(),
            "⚠️ Could not create {}: {} (continuing with reduced functionality)",
            dir.display(),
            err
        );
    }

    // Initialize services
    let probe = Arc::new(HttpWorkerProbe::new(settings.probe_timeout, settings.graceful_stop_timeout));
    let manager = WorkerManager::new(settings.clone(), probe);
    let store = Arc::new(JsonStateStore::new(settings.state_dir()));
    let notifier: Arc<dyn Notifier> = match &settings.notify_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(TracingNotifier),
    };
    let inspector = Arc::new(SystemProcessInspector::new());

    // Create orchestrator with dependency injection
    let orchestrator = Orchestrator::new(manager, store, notifier, inspector);

    match orchestrator.recover().await {
        Ok(report) => {
            process_info!(
                ProcessId::current(),
                "🔁 Startup reconciliation: {} found, {} recovered, {} reset",
                report.found,
                report.recovered,
                report.reset
            );
            for detail in report.details.iter().filter(|d| !d.recovered) {
                process_debug!(
                    ProcessId::current(),
                    "Worker {} not recovered: {:?}",
                    detail.worker_id,
                    detail.reason
                );
            }
        }
        Err(e) => logging::log_error(ProcessId::current(), "Startup recovery", &e),
    }

    // Set up graceful shutdown
    let shutdown_sender = orchestrator.get_shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
                let _ = shutdown_sender.send(()).await;
            }
            Err(err) => {
                logging::log_error(ProcessId::current(), "Signal handling", &err);
            }
        }
    });

    // Run main event loop
    orchestrator.run().await?;

    logging::log_success(ProcessId::current(), "Orchestrator stopped gracefully");
    logging::flush_traces().await;
    Ok(())
}
