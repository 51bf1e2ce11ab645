//! Built-in notification channels
//!
//! One implementation per transport; the router treats them uniformly
//! through the `NotificationChannel` trait. The webhook channel covers
//! chat tools and pub/sub bridges that accept JSON posts; the log
//! channel ships for development and as a last-resort sink.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

use crate::error::{Error, Result};
use crate::providers::NotificationChannel;
use crate::types::Severity;

/// Emits alerts into the process log stream.
pub struct LogChannel {
    min_severity: Severity,
}

impl LogChannel {
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn min_severity(&self) -> Severity {
        self.min_severity
    }

    async fn send(
        &self,
        target: &str,
        severity: Severity,
        title: &str,
        body: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<()> {
        info!(target_service = target, %severity, title, body, "alert");
        Ok(())
    }
}

/// Posts alerts as JSON to a configured webhook endpoint.
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    min_severity: Severity,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: String, url: String, min_severity: Severity) -> Self {
        Self {
            name,
            url,
            headers: HashMap::new(),
            min_severity,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> Severity {
        self.min_severity
    }

    async fn send(
        &self,
        target: &str,
        severity: Severity,
        title: &str,
        body: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let payload = json!({
            "target": target,
            "severity": severity,
            "title": title,
            "body": body,
            "metadata": metadata,
        });

        let mut request = self.client.post(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.json(&payload).send().await.map_err(|e| {
            Error::Notification {
                channel: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::Notification {
                channel: self.name.clone(),
                reason: format!("endpoint returned {}", response.status()),
            });
        }
        Ok(())
    }
}
