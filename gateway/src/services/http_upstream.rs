//! Upstream worker calls over HTTP

use std::time::Duration;

use crate::config::GatewaySettings;
use crate::error::{GatewayError, GatewayResult};
use crate::traits::Upstream;
use crate::types::{ForwardRequest, ForwardResponse, UpstreamStatus};

/// Prefix of every worker API path
pub const WORKER_API_PREFIX: &str = "/api/v1/";

pub struct HttpUpstream {
    client: reqwest::Client,
    proxy_timeout: Duration,
    status_timeout: Duration,
    health_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            proxy_timeout: settings.proxy_timeout,
            status_timeout: settings.status_timeout,
            health_timeout: settings.health_timeout,
        }
    }

    fn classify(&self, upstream: &str, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::UpstreamTimeout {
                upstream: upstream.to_string(),
                timeout: self.proxy_timeout,
            }
        } else {
            GatewayError::UpstreamUnavailable {
                upstream: upstream.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// `<upstream>/api/v1/<path>[?query]`
pub fn target_url(upstream: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!(
        "{}{}{}",
        upstream.trim_end_matches('/'),
        WORKER_API_PREFIX,
        path.trim_start_matches('/')
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[async_trait::async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, upstream: &str, request: ForwardRequest) -> GatewayResult<ForwardResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| GatewayError::InvalidMethod {
            method: request.method.clone(),
        })?;
        let url = target_url(upstream, &request.path, request.query.as_deref());

        let mut builder = self.client.request(method, &url).timeout(self.proxy_timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_slice());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| self.classify(upstream, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response.bytes().await.map_err(|e| self.classify(upstream, e))?;

        Ok(ForwardResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    async fn status(&self, upstream: &str) -> UpstreamStatus {
        let url = target_url(upstream, "status", None);
        let response = match self.client.get(&url).timeout(self.status_timeout).send().await {
            Ok(response) => response,
            Err(e) => return UpstreamStatus::Unreachable(e.to_string()),
        };

        if response.status() != reqwest::StatusCode::OK {
            return UpstreamStatus::HttpError(response.status().as_u16());
        }
        match response.json::<serde_json::Value>().await {
            Ok(data) => UpstreamStatus::Healthy(data),
            Err(e) => UpstreamStatus::Unreachable(e.to_string()),
        }
    }

    async fn health(&self, health_check: &str) -> bool {
        match self.client.get(health_check).timeout(self.health_timeout).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url() {
        assert_eq!(
            target_url("http://127.0.0.1:8088", "balance", None),
            "http://127.0.0.1:8088/api/v1/balance"
        );
        assert_eq!(
            target_url("http://127.0.0.1:8088/", "/trades", Some("limit=5")),
            "http://127.0.0.1:8088/api/v1/trades?limit=5"
        );
        assert_eq!(target_url("http://h:1", "a/b", Some("")), "http://h:1/api/v1/a/b");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_502() {
        let upstream = HttpUpstream::new(&GatewaySettings::default());
        let request = ForwardRequest {
            method: "GET".to_string(),
            path: "ping".to_string(),
            query: None,
            headers: Vec::new(),
            body: Vec::new(),
        };

        // nothing listens on port 1
        let err = upstream.forward("http://127.0.0.1:1", request).await.unwrap_err();

        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
        assert!(!upstream.health("http://127.0.0.1:1/api/v1/ping").await);
        assert!(matches!(
            upstream.status("http://127.0.0.1:1").await,
            UpstreamStatus::Unreachable(_)
        ));
    }
}
