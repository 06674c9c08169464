//! Worker stub entry point

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

use shared::{logging, ProcessId};
use worker_stub::{load_worker_config, WorkerStub};

/// Stand-in for the trading worker runtime
#[derive(Parser, Debug)]
#[command(name = "worker-stub")]
#[command(about = "Serves the worker API and writes heartbeats until stopped")]
struct Args {
    /// Run mode; only `trade` is understood
    mode: Option<String>,

    /// Worker configuration document (strategy_<id>.json)
    #[arg(long)]
    config: PathBuf,

    /// Log file receiving heartbeat lines
    #[arg(long)]
    logfile: PathBuf,

    /// Seconds between heartbeat lines
    #[arg(long, env = "WORKER_HEARTBEAT_SECS", default_value = "60")]
    heartbeat_secs: u64,

    /// Listen port, overriding the one in the config document
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WORKER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Some(mode) = args.mode.as_deref().filter(|m| *m != "trade") {
        bail!("unsupported mode '{mode}', expected 'trade'");
    }
    if args.heartbeat_secs == 0 {
        bail!("--heartbeat-secs must be positive");
    }

    let config = load_worker_config(&args.config).await?.with_port(args.port);

    ProcessId::init_worker(config.worker_id);
    logging::init_tracing_with_endpoint_and_level(None, Some(&args.log_level));
    logging::log_startup(
        ProcessId::current(),
        &format!("{} on {} (log {})", config.strategy, config.listen_addr(), args.logfile.display()),
    );

    let stub = WorkerStub::new(config, args.logfile).with_heartbeat_interval(Duration::from_secs(args.heartbeat_secs));

    let shutdown_sender = stub.get_shutdown_sender();
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

    stub.run().await?;

    logging::log_success(ProcessId::current(), "Worker stopped");
    Ok(())
}
