//! Service trait definitions for dependency injection
//!
//! The route file and the upstream HTTP calls sit behind these traits so
//! handlers can be tested without workers on the other end.

use async_trait::async_trait;
use shared::RouteTable;

use crate::error::GatewayResult;
use crate::types::{ForwardRequest, ForwardResponse, UpstreamStatus};

/// Durable source of the routing table
#[mockall::automock]
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn load(&self) -> GatewayResult<RouteTable>;
}

/// HTTP calls to worker APIs
#[mockall::automock]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward a request to `<upstream>/api/v1/<path>`
    async fn forward(&self, upstream: &str, request: ForwardRequest) -> GatewayResult<ForwardResponse>;

    /// Fetch `<upstream>/api/v1/status`; failures are part of the result
    async fn status(&self, upstream: &str) -> UpstreamStatus;

    /// `true` only on HTTP 200 from the health-check URL
    async fn health(&self, health_check: &str) -> bool;
}
