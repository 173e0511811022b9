// src/ocr_client.rs

use crate::config::{OcrConfig, PromptField};
use crate::error::OcrError;
use crate::http;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// External document-extraction service.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Run extraction on the file at `path`, returning the raw response.
    async fn extract(&self, path: &Path) -> Result<Value, OcrError>;
}

/// Multipart client for the VLM extraction endpoint.
///
/// One attempt per file; failures go back to the caller.
pub struct HttpOcrClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_type: String,
    processor_id: String,
    data_classification: String,
    prompt: Vec<PromptField>,
}

impl HttpOcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::client_with_timeout(Duration::from_secs(config.timeout_secs))?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model_type: config.model_type.clone(),
            processor_id: config.processor_id.clone(),
            data_classification: config.data_classification.clone(),
            prompt: config.prompt.clone(),
        })
    }

    fn api_key(&self) -> Result<&str, OcrError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(OcrError::MissingApiKey),
        }
    }
}

/// Parse the body as JSON, or keep it as a JSON string when it is not.
fn decode_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

#[async_trait]
impl OcrService for HttpOcrClient {
    async fn extract(&self, path: &Path) -> Result<Value, OcrError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(OcrError::MissingFile(path.to_path_buf()));
        }
        let api_key = self.api_key()?;

        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.pdf".to_string());
        let prompt = serde_json::to_string(&self.prompt).unwrap_or_else(|_| "[]".to_string());

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(filename.clone()))
            .text("model_type", self.model_type.clone())
            .text("processor_id", self.processor_id.clone())
            .text("vlm_prompt", prompt)
            .text("data_classification", self.data_classification.clone());

        let started = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;
        let elapsed_ms = started.elapsed().as_millis();

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(file = %filename, status = %status, elapsed_ms, "OCR request rejected");
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(file = %filename, status = %status, elapsed_ms, bytes = body.len(), "OCR response received");
        debug!(body = %body, "OCR raw response");
        Ok(decode_body(body))
    }
}
