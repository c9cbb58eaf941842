use super::NormalizedRecord;
use crate::config::WebhookConfig;
use crate::errors::{BridgeError, BridgeResult};
use crate::utils::http::http_client;
use crate::utils::metrics::WEBHOOK_FAILURES_TOTAL;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A delivery that did not reach the webhook consumer.
#[derive(Debug, Clone)]
pub struct ForwardingFailure {
    pub record: NormalizedRecord,
    pub error: String,
}

/// Fire-and-forget delivery of normalized records to one downstream URL.
///
/// Failures never reach the caller. They are logged, counted and published on
/// a broadcast channel for anyone watching.
pub struct WebhookForwarder {
    client: Client,
    url: Option<String>,
    failures: broadcast::Sender<ForwardingFailure>,
}

impl WebhookForwarder {
    /// An empty `url` disables forwarding.
    pub fn new(url: &str, timeout: Duration) -> Self {
        let url = url.trim();
        let url = if url.is_empty() {
            info!("webhook url not configured; inbound events will only be audited");
            None
        } else {
            Some(url.to_string())
        };
        let (failures, _) = broadcast::channel(64);
        Self {
            client: http_client(timeout),
            url,
            failures,
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(&config.url, Duration::from_secs(config.timeout_secs))
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<ForwardingFailure> {
        self.failures.subscribe()
    }

    /// POST `record` as JSON and wait for the result.
    pub async fn deliver(&self, record: &NormalizedRecord) -> BridgeResult<()> {
        let Some(url) = &self.url else {
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(|e| BridgeError::Forwarding(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::Forwarding(format!(
                "webhook responded {}",
                response.status()
            )));
        }
        debug!("forwarded record from {} to webhook", record.from);
        Ok(())
    }

    /// Deliver in the background. Returns the task handle, or `None` when
    /// forwarding is disabled.
    pub fn forward(self: &Arc<Self>, record: NormalizedRecord) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = this.deliver(&record).await {
                warn!("webhook delivery failed for {}: {}", record.from, e);
                metrics::counter!(WEBHOOK_FAILURES_TOTAL).increment(1);
                let _ = this.failures.send(ForwardingFailure {
                    record,
                    error: e.to_string(),
                });
            }
        }))
    }
}
