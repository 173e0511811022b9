// src/webhook.rs

use crate::batch::SummaryPayload;
use crate::error::WebhookError;
use crate::http;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Downstream receiver of flush summaries.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn send(&self, payload: &SummaryPayload) -> Result<(), WebhookError>;

    /// Where payloads go, for status reporting.
    fn target(&self) -> &str;
}

/// POSTs each summary as JSON; any non-2xx status is a failure.
pub struct HttpWebhook {
    client: Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::client_with_timeout(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn send(&self, payload: &SummaryPayload) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WebhookError::Status { status, body });
        }

        info!(url = %self.url, status = %response.status(), "Summary delivered");
        Ok(())
    }

    fn target(&self) -> &str {
        &self.url
    }
}
