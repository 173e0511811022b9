//! Error types for each external collaborator.

use std::path::PathBuf;
use thiserror::Error;

/// Loading or validating the TOML configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Calls to the OCR / document-extraction API.
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("missing or invalid file path: {0}")]
    MissingFile(PathBuf),

    #[error("missing OCR API key")]
    MissingApiKey,

    #[error("failed to read attachment: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// Delivery of the summary payload to the downstream webhook.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Decrypting a submission envelope and fetching its attachments.
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("decryption service unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decryption service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed decrypted submission: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("attachment {field_id} is not valid base64: {source}")]
    Attachment {
        field_id: String,
        source: base64::DecodeError,
    },

    #[error("missing form secret key")]
    MissingSecretKey,
}

/// Writing attachments to the transient upload directory.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to prepare upload dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
