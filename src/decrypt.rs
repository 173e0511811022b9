//! Submission decryption and attachment download.
//!
//! The form platform encrypts each submission for the form owner. Decrypting
//! it (and fetching attachments from their short-lived URLs) happens outside
//! this service; [`HttpDecryptor`] hands the envelope to a decryption sidecar.

use crate::error::DecryptError;
use crate::http;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// One question/answer pair from the decrypted form. The platform's `_id`
/// is ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormResponse {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptedSubmission {
    pub responses: Vec<FormResponse>,
    /// Keyed by form field id.
    pub attachments: BTreeMap<String, Attachment>,
}

impl DecryptedSubmission {
    /// Answer to the first question mentioning "email".
    pub fn email(&self) -> Option<String> {
        self.responses
            .iter()
            .find(|r| {
                r.question
                    .as_deref()
                    .is_some_and(|q| q.to_lowercase().contains("email"))
            })
            .and_then(|r| r.answer.as_ref())
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    #[serde(default)]
    filename: Option<String>,
    /// base64
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireSubmission {
    #[serde(default)]
    responses: Vec<FormResponse>,
    #[serde(default)]
    attachments: BTreeMap<String, WireAttachment>,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    content: Option<WireSubmission>,
    #[serde(default)]
    responses: Vec<FormResponse>,
    #[serde(default)]
    attachments: BTreeMap<String, WireAttachment>,
}

impl TryFrom<WireSubmission> for DecryptedSubmission {
    type Error = DecryptError;

    fn try_from(wire: WireSubmission) -> Result<Self, Self::Error> {
        let attachments = wire
            .attachments
            .into_iter()
            .map(|(field_id, att)| {
                let content = STANDARD
                    .decode(att.content.as_bytes())
                    .map_err(|source| DecryptError::Attachment {
                        field_id: field_id.clone(),
                        source,
                    })?;
                let filename = att.filename.unwrap_or_else(|| "file.bin".to_string());
                Ok((field_id, Attachment { filename, content }))
            })
            .collect::<Result<BTreeMap<_, _>, DecryptError>>()?;

        Ok(Self {
            responses: wire.responses,
            attachments,
        })
    }
}

/// Accepts both `{responses, attachments}` and the SDK's
/// `{content: {responses}, attachments}` layout.
fn parse_decrypted(value: Value) -> Result<Option<DecryptedSubmission>, DecryptError> {
    if value.is_null() {
        return Ok(None);
    }
    let envelope: WireEnvelope = serde_json::from_value(value)?;
    let (responses, mut attachments) = match envelope.content {
        Some(content) => (content.responses, content.attachments),
        None => (envelope.responses, BTreeMap::new()),
    };
    attachments.extend(envelope.attachments);

    DecryptedSubmission::try_from(WireSubmission {
        responses,
        attachments,
    })
    .map(Some)
}

#[async_trait]
pub trait SubmissionDecryptor: Send + Sync {
    /// `Ok(None)` means the envelope could not be decrypted with our key.
    async fn decrypt(&self, data: &Value) -> Result<Option<DecryptedSubmission>, DecryptError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest<'a> {
    secret_key: &'a str,
    data: &'a Value,
}

/// Delegates to a decryption service; attachment bytes come back base64'd.
pub struct HttpDecryptor {
    client: reqwest::Client,
    url: String,
    secret_key: Option<String>,
}

impl HttpDecryptor {
    pub fn new(
        url: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::client_with_timeout(timeout)?,
            url: url.into(),
            secret_key,
        })
    }
}

#[async_trait]
impl SubmissionDecryptor for HttpDecryptor {
    async fn decrypt(&self, data: &Value) -> Result<Option<DecryptedSubmission>, DecryptError> {
        let secret_key = self
            .secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(DecryptError::MissingSecretKey)?;

        let response = self
            .client
            .post(&self.url)
            .json(&DecryptRequest { secret_key, data })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DecryptError::Status { status, body });
        }

        let value: Value = response.json().await?;
        let submission = parse_decrypted(value)?;
        if let Some(ref s) = submission {
            info!(
                responses = s.responses.len(),
                attachments = s.attachments.len(),
                "decrypt_ok"
            );
        }
        Ok(submission)
    }
}

/// For local runs where `data` is already the decrypted submission.
pub struct PassthroughDecryptor;

#[async_trait]
impl SubmissionDecryptor for PassthroughDecryptor {
    async fn decrypt(&self, data: &Value) -> Result<Option<DecryptedSubmission>, DecryptError> {
        debug!("Passthrough decryption");
        parse_decrypted(data.clone())
    }
}
