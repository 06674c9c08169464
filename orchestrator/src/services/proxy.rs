//! Static proxy table resolved from settings

use std::collections::HashMap;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::ProxyResolver;

#[derive(Debug, Clone, Default)]
pub struct StaticProxyResolver {
    proxies: HashMap<u32, String>,
}

impl StaticProxyResolver {
    pub fn new(proxies: HashMap<u32, String>) -> Self {
        Self { proxies }
    }
}

#[async_trait::async_trait]
impl ProxyResolver for StaticProxyResolver {
    async fn resolve(&self, proxy_id: Option<u32>) -> OrchestratorResult<Option<String>> {
        let Some(proxy_id) = proxy_id else {
            return Ok(None);
        };
        self.proxies
            .get(&proxy_id)
            .cloned()
            .map(Some)
            .ok_or_else(|| OrchestratorError::ProxyError {
                proxy_id,
                message: "no proxy configured with this id".to_string(),
            })
    }
}
