//! Gateway process entry point

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

use gateway::{FileRouteSource, Gateway, GatewayResult, GatewaySettings, HttpUpstream};
use shared::{logging, process_warn, ProcessId};

/// Reverse proxy in front of every worker API
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Routes /api/strategy/{id}/... to the worker registered under that id")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "GATEWAY_PORT", default_value = "8080")]
    port: u16,

    /// Routes file written by the orchestrator
    #[arg(long, env = "GATEWAY_ROUTES_FILE", default_value = "./data/gateway_routes.json")]
    routes_file: PathBuf,

    /// Seconds to wait for a proxied worker response
    #[arg(long, env = "GATEWAY_PROXY_TIMEOUT", default_value = "30")]
    proxy_timeout: u64,

    /// Seconds to wait for a worker health check
    #[arg(long, env = "GATEWAY_HEALTH_TIMEOUT", default_value = "5")]
    health_timeout: u64,

    /// Seconds to wait for a worker status probe
    #[arg(long, env = "GATEWAY_STATUS_TIMEOUT", default_value = "10")]
    status_timeout: u64,

    /// Health score (percent) below which the gateway reports degraded
    #[arg(long, env = "GATEWAY_DEGRADED_THRESHOLD", default_value = "80")]
    degraded_threshold: f64,

    /// Tracing endpoint URL (if set, traces will be sent here)
    #[arg(long, env = "GATEWAY_TRACE_EP")]
    trace_ep: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            listen_addr: SocketAddr::new(self.host, self.port),
            routes_path: self.routes_file.clone(),
            proxy_timeout: Duration::from_secs(self.proxy_timeout),
            health_timeout: Duration::from_secs(self.health_timeout),
            status_timeout: Duration::from_secs(self.status_timeout),
            degraded_threshold: self.degraded_threshold,
        }
    }
}

#[tokio::main]
async fn main() -> GatewayResult<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    // Initialize process ID singleton for the gateway
    ProcessId::init_gateway();

    let trace_endpoint = args
        .trace_ep
        .as_ref()
        .map(|url| logging::TracingEndpoint::new(url.clone()));
    logging::init_tracing_with_endpoint_and_level(trace_endpoint, Some(&args.log_level));

    let settings = args.settings();
    settings.validate()?;
    logging::log_startup(
        ProcessId::current(),
        &format!("gateway on {} (routes file {})", settings.listen_addr, settings.routes_path.display()),
    );

    // Initialize services with dependency injection
    let route_source = FileRouteSource::new(settings.routes_path.clone());
    let upstream = HttpUpstream::new(&settings);
    let gateway = Gateway::new(settings, route_source, upstream);

    // Resume routing from the last table the orchestrator wrote
    if let Err(e) = gateway.reload_routes().await {
        process_warn!(
            ProcessId::current(),
            "⚠️ Initial routes load failed, starting with an empty table: {}",
            e
        );
    }

    // Set up graceful shutdown
    let shutdown_sender = gateway.get_shutdown_sender();
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

    gateway.run().await?;

    logging::log_success(ProcessId::current(), "Gateway stopped gracefully");
    logging::flush_traces().await;
    Ok(())
}
