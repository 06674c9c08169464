//! Notification sinks

use std::time::Duration;

use shared::{process_error, process_info, process_warn, ProcessId, Severity};

use crate::traits::{Notification, Notifier};

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait::async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => {
                process_info!(
                    ProcessId::current(),
                    "📣 [{}] {}: {}",
                    notification.recipient,
                    notification.title,
                    notification.message
                );
            }
            Severity::Warning => {
                process_warn!(
                    ProcessId::current(),
                    "📣 [{}] {}: {}",
                    notification.recipient,
                    notification.title,
                    notification.message
                );
            }
            Severity::Critical => {
                process_error!(
                    ProcessId::current(),
                    "🚨 [{}] {}: {}",
                    notification.recipient,
                    notification.title,
                    notification.message
                );
            }
        }
    }
}

/// POSTs each notification as JSON to a webhook, in the background
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let result = client.post(&url).timeout(timeout).json(&notification).send().await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Notification '{}' rejected by webhook: HTTP {}",
                        notification.title,
                        response.status()
                    );
                }
                Err(e) => {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Notification '{}' could not be delivered: {}",
                        notification.title,
                        e
                    );
                }
            }
        });
    }
}
