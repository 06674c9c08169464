//! Environment-based exchange credentials
//!
//! Credentials for exchange `binance` are read from `BINANCE_API_KEY` and
//! `BINANCE_API_SECRET`. Variables are loaded from:
//! 1. `.env` file in the current directory or parent directories (if present)
//! 2. System environment variables
//!
//! Dry-run workers never touch the exchange account, so they may run with
//! empty credentials; live workers may not.

use std::collections::HashMap;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{CredentialSource, Credentials};

/// Credential source backed by environment variables
#[derive(Debug, Default)]
pub struct EnvCredentialSource {
    /// Fixed variables used instead of the process environment
    fixed: Option<HashMap<String, String>>,
}

impl EnvCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve from a fixed variable map instead of the environment
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { fixed: Some(vars) }
    }

    pub fn key_var(exchange: &str) -> String {
        format!("{}_API_KEY", Self::prefix(exchange))
    }

    pub fn secret_var(exchange: &str) -> String {
        format!("{}_API_SECRET", Self::prefix(exchange))
    }

    fn prefix(exchange: &str) -> String {
        exchange
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }

    fn lookup(&self, name: &str) -> Option<String> {
        let value = match &self.fixed {
            Some(vars) => vars.get(name).cloned(),
            None => {
                // dotenv ignores variables that are already set
                let _ = dotenv::dotenv();
                std::env::var(name).ok()
            }
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

#[async_trait::async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn credentials(&self, exchange: &str, dry_run: bool) -> OrchestratorResult<Credentials> {
        let key_var = Self::key_var(exchange);
        let secret_var = Self::secret_var(exchange);

        match (self.lookup(&key_var), self.lookup(&secret_var)) {
            (Some(key), Some(secret)) => Ok(Credentials { key, secret }),
            _ if dry_run => Ok(Credentials::default()),
            (key, _) => {
                let missing = if key.is_none() { key_var } else { secret_var };
                Err(OrchestratorError::config(
                    missing,
                    format!("live trading on '{exchange}' requires exchange credentials"),
                ))
            }
        }
    }
}
