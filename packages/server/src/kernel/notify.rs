//! Operator notifications.
//!
//! Crawl runs notify an operator when a credential is missing or rejected
//! and when a run finishes with failures. Delivery is best-effort: a failed
//! notification is logged, never propagated into the run outcome.

use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Posts notifications to a configured webhook as `{"title", "body"}` JSON.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "title": title, "body": body }))
            .send()
            .await
            .context("failed to reach notification webhook")?;
        response
            .error_for_status()
            .context("notification webhook rejected the message")?;
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _title: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}

/// Send a notification, logging instead of failing when delivery breaks.
pub async fn notify_best_effort(notifier: &dyn Notifier, title: &str, body: &str) {
    if let Err(error) = notifier.notify(title, body).await {
        warn!(error = %error, title = %title, "failed to deliver notification");
    }
}

/// Test double that records every message it is asked to deliver.
pub struct RecordingNotifier {
    messages: RwLock<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.messages.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}
