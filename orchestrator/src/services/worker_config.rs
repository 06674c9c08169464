//! Per-worker configuration document
//!
//! The document is the contract with the worker runtime: it carries the
//! assigned API port, exchange credentials, the optional outbound proxy and
//! the signal webhook.

use serde_json::{json, Value};
use std::path::Path;

use shared::{SharedError, WorkerSpec};

use crate::config::FleetSettings;
use crate::error::OrchestratorResult;
use crate::traits::Credentials;

pub fn render_worker_config(
    spec: &WorkerSpec,
    port: u16,
    credentials: &Credentials,
    proxy: Option<&str>,
    settings: &FleetSettings,
) -> Value {
    let proxies = match proxy {
        Some(url) => json!({ "http": url, "https": url }),
        None => json!({}),
    };
    let webhook_base = settings.webhook_base_url.trim_end_matches('/');

    json!({
        "strategy": spec.strategy_class,
        "strategy_path": settings.strategies_dir.to_string_lossy(),
        "timeframe": spec.timeframe,
        "dry_run": spec.dry_run,
        "dry_run_wallet": spec.dry_run_wallet,
        "stake_amount": spec.stake_amount.map(Value::from).unwrap_or_else(|| json!("unlimited")),
        "max_open_trades": spec.max_open_trades,
        "exchange": {
            "name": spec.exchange,
            "key": credentials.key,
            "secret": credentials.secret,
            "ccxt_config": {
                "enableRateLimit": true,
                "proxies": proxies,
            },
            "pair_whitelist": spec.pair_whitelist,
            "pair_blacklist": spec.pair_blacklist,
        },
        "pairlists": [{ "method": "StaticPairList" }],
        "api_server": {
            "enabled": true,
            "listen_ip_address": shared::routes::WORKER_HOST,
            "listen_port": port,
            "verbosity": "info",
            "enable_openapi": true,
            "jwt_secret_key": format!("fleet-worker-{}", spec.id),
            "CORS_origins": settings.cors_origins,
        },
        "webhook": {
            "enabled": true,
            "url": format!("{webhook_base}/{}", spec.id),
            "format": "json",
            "strategy_version": spec.version,
        },
        "initial_state": "running",
        "internals": {
            "process_throttle_secs": 5,
        },
    })
}

/// Write the document next to `path` and rename it into place
pub async fn write_worker_config(path: &Path, config: &Value) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SharedError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await.map_err(|e| SharedError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| SharedError::io(path, e))?;
    Ok(())
}
