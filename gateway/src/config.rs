//! Gateway settings

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Health score (percent) below which the gateway reports itself degraded
pub const DEFAULT_DEGRADED_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub listen_addr: SocketAddr,
    pub routes_path: PathBuf,
    pub proxy_timeout: Duration,
    pub health_timeout: Duration,
    pub status_timeout: Duration,
    pub degraded_threshold: f64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            routes_path: PathBuf::from("./data/gateway_routes.json"),
            proxy_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(10),
            degraded_threshold: DEFAULT_DEGRADED_THRESHOLD,
        }
    }
}

impl GatewaySettings {
    pub fn validate(&self) -> GatewayResult<()> {
        if !(0.0..=100.0).contains(&self.degraded_threshold) {
            return Err(GatewayError::config(
                "degraded_threshold",
                format!("{} is not a percentage", self.degraded_threshold),
            ));
        }
        for (field, timeout) in [
            ("proxy_timeout", self.proxy_timeout),
            ("health_timeout", self.health_timeout),
            ("status_timeout", self.status_timeout),
        ] {
            if timeout.is_zero() {
                return Err(GatewayError::config(field, "must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = GatewaySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.listen_addr.port(), 8080);
        assert_eq!(settings.proxy_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let settings = GatewaySettings {
            degraded_threshold: 120.0,
            ..GatewaySettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(GatewayError::ConfigError { ref field, .. }) if field == "degraded_threshold"
        ));
    }
}
