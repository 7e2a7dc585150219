//! Diffwatch notification sinks.
//!
//! A [`Handler`] receives finished [`AlertRecord`]s from the dispatcher, one
//! call per alert. Failures are returned to the caller, which owns retries.

#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use diffwatch_core::config::{HandlerConfig, WebhookConfig};
use diffwatch_core::AlertRecord;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
    #[error("handler not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, alert: &AlertRecord) -> Result<(), NotifyError>;
}

/// Emits each alert as a structured log line.
#[derive(Debug, Default)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &'static str { "log" }

    async fn handle(&self, alert: &AlertRecord) -> Result<(), NotifyError> {
        info!(
            target: "diffwatch::alert",
            kind = %alert.kind,
            api_version = %alert.api_version,
            namespace = %alert.namespace,
            name = %alert.name,
            status = %alert.status,
            reason = %alert.reason,
            diff = alert.diff.as_deref().unwrap_or(""),
            "{}",
            alert.summary()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    alert: &'a AlertRecord,
}

/// POSTs each alert as JSON to a fixed URL.
pub struct WebhookHandler {
    url: String,
    headers: reqwest::header::HeaderMap,
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new(cfg: &WebhookConfig) -> Result<Self, NotifyError> {
        if cfg.url.is_empty() {
            return Err(NotifyError::NotConfigured("webhook url is empty".into()));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        for (k, v) in &cfg.headers {
            let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| NotifyError::NotConfigured(format!("header {}: {}", k, e)))?;
            let value = reqwest::header::HeaderValue::from_str(v)
                .map_err(|e| NotifyError::NotConfigured(format!("header {}: {}", k, e)))?;
            headers.insert(name, value);
        }
        Ok(Self { url: cfg.url.clone(), headers, client: reqwest::Client::new() })
    }
}

#[async_trait]
impl Handler for WebhookHandler {
    fn name(&self) -> &'static str { "webhook" }

    async fn handle(&self, alert: &AlertRecord) -> Result<(), NotifyError> {
        let payload = WebhookPayload { text: alert.summary(), alert };
        let resp = self.client.post(&self.url).headers(self.headers.clone()).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(url = %self.url, status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}

/// Pick the sink from config: webhook when configured, log otherwise.
pub fn from_config(cfg: &HandlerConfig) -> Result<Arc<dyn Handler>, NotifyError> {
    match &cfg.webhook {
        Some(w) => Ok(Arc::new(WebhookHandler::new(w)?)),
        None => Ok(Arc::new(LogHandler)),
    }
}
