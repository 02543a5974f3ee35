//! Alert delivery sinks.

use async_trait::async_trait;
use tracing::{info, warn};

use seismonet_models::{Alert, AlertLevel, SeismoError, SeismoResult};
use seismonet_pipeline::AlertSink;

/// Sink that emits alerts through the process log. Always configured as a
/// fallback so alerts are never invisible.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alert: &Alert) -> SeismoResult<()> {
        match alert.level {
            AlertLevel::Critical | AlertLevel::Warn => {
                warn!(
                    event = %alert.event_id,
                    level = %alert.level,
                    dedup = %alert.dedup_key,
                    "ALERT {}",
                    alert.payload
                );
            }
            AlertLevel::Info => {
                info!(
                    event = %alert.event_id,
                    dedup = %alert.dedup_key,
                    "alert {}",
                    alert.payload
                );
            }
        }
        Ok(())
    }
}

/// Sink that POSTs the alert JSON to a subscriber endpoint. Subscribers
/// must be idempotent on `event_id`; delivery is at-least-once.
pub struct WebhookSink {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alert: &Alert) -> SeismoResult<()> {
        let response = self
            .http
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| SeismoError::Transient(format!("webhook send: {}", e)))?;
        if !response.status().is_success() {
            return Err(SeismoError::Transient(format!(
                "webhook {} returned {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }
}
