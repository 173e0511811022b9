use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub decrypt: DecryptConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Header that must carry the form platform's webhook signature.
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// Which submissions share a duplicate-counting session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchScope {
    /// Every submission within one inactivity window is counted together.
    #[default]
    Shared,
    /// Each submission is counted on its own.
    PerSubmission,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default)]
    pub scope: BatchScope,
    /// Emit `icDuplicates` in the summary payload.
    #[serde(default = "default_true")]
    pub include_ic_duplicates: bool,
}

/// One entry of the `vlm_prompt` form field sent to the extraction API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptField {
    pub key: String,
    pub description: String,
    #[serde(rename = "type", default = "default_prompt_type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_url")]
    pub url: String,
    /// Read from `OCR_API_KEY` when not set here.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default = "default_processor_id")]
    pub processor_id: String,
    #[serde(default = "default_data_classification")]
    pub data_classification: String,
    #[serde(default = "default_prompt")]
    pub prompt: Vec<PromptField>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_url")]
    pub url: String,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptMode {
    /// Envelopes are decrypted by an external service.
    #[default]
    Http,
    /// Envelopes arrive already decrypted (local development).
    Passthrough,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecryptConfig {
    #[serde(default)]
    pub mode: DecryptMode,
    #[serde(default = "default_decrypt_url")]
    pub url: String,
    /// Read from `FORM_SECRET_KEY` when not set here.
    #[serde(default)]
    pub form_secret_key: Option<String>,
    #[serde(default = "default_decrypt_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Remove each attachment file as soon as it has been through OCR.
    #[serde(default = "default_true")]
    pub eager_cleanup: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_signature_header() -> String {
    "X-FormSG-Signature".to_string()
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

fn default_window_secs() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

fn default_prompt_type() -> String {
    "string".to_string()
}

fn default_ocr_url() -> String {
    "https://api.read-dev.pic.net.sg/v1/extract".to_string()
}

fn default_model_type() -> String {
    "extract_general".to_string()
}

fn default_processor_id() -> String {
    "VLM".to_string()
}

fn default_data_classification() -> String {
    "rsn".to_string()
}

fn default_prompt() -> Vec<PromptField> {
    [
        ("employee_names", "Extract all employee names"),
        ("company_names", "Extract all company names"),
        ("ic_numbers", "Extract all identification numbers"),
    ]
    .into_iter()
    .map(|(key, description)| PromptField {
        key: key.to_string(),
        description: description.to_string(),
        kind: default_prompt_type(),
    })
    .collect()
}

fn default_ocr_timeout_secs() -> u64 {
    120
}

fn default_webhook_url() -> String {
    "https://plumber.gov.sg/webhooks/4acce619-2b72-4b05-9d97-46a70fd664a3".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_decrypt_url() -> String {
    "http://127.0.0.1:8081/decrypt".to_string()
}

fn default_decrypt_timeout_secs() -> u64 {
    60
}

fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("tender_uploads")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            signature_header: default_signature_header(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            scope: BatchScope::default(),
            include_ic_duplicates: true,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            url: default_ocr_url(),
            api_key: None,
            model_type: default_model_type(),
            processor_id: default_processor_id(),
            data_classification: default_data_classification(),
            prompt: default_prompt(),
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: default_webhook_url(),
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            mode: DecryptMode::default(),
            url: default_decrypt_url(),
            form_secret_key: None,
            timeout_secs: default_decrypt_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            eager_cleanup: true,
        }
    }
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a port number: {port}")))?;
        }
        if let Some(secs) = lookup("BATCH_WINDOW_SECS") {
            self.batch.window_secs = secs.parse().map_err(|_| {
                ConfigError::Invalid(format!("BATCH_WINDOW_SECS is not a number: {secs}"))
            })?;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("OCR_API_KEY") {
            self.ocr.api_key = Some(key);
        }
        if let Some(key) = lookup("FORM_SECRET_KEY") {
            self.decrypt.form_secret_key = Some(key);
        }
        if let Some(url) = lookup("WEBHOOK_URL") {
            self.webhook.url = url;
        }
        if let Some(url) = lookup("DECRYPT_URL") {
            self.decrypt.url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.window_secs == 0 {
            return Err(ConfigError::Invalid("batch.window_secs must be > 0".into()));
        }
        if self.webhook.url.trim().is_empty() {
            return Err(ConfigError::Invalid("webhook.url must be set".into()));
        }
        if self.decrypt.mode == DecryptMode::Http && self.decrypt.url.trim().is_empty() {
            return Err(ConfigError::Invalid("decrypt.url must be set in http mode".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.batch.window_secs, 20);
        assert_eq!(cfg.batch.scope, BatchScope::Shared);
        assert!(cfg.batch.include_ic_duplicates);
        assert_eq!(cfg.ocr.model_type, "extract_general");
        assert_eq!(cfg.ocr.prompt.len(), 3);
        assert!(cfg.storage.eager_cleanup);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_sections_override_defaults() {
        let cfg = Config::parse(
            r#"
            [batch]
            window_secs = 5
            scope = "per_submission"
            include_ic_duplicates = false

            [[ocr.prompt]]
            key = "employee_names"
            description = "Extract all employee names starting with A"

            [decrypt]
            mode = "passthrough"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.batch.window(), Duration::from_secs(5));
        assert_eq!(cfg.batch.scope, BatchScope::PerSubmission);
        assert!(!cfg.batch.include_ic_duplicates);
        assert_eq!(cfg.ocr.prompt.len(), 1);
        assert_eq!(cfg.ocr.prompt[0].kind, "string");
        assert_eq!(cfg.decrypt.mode, DecryptMode::Passthrough);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("OCR_API_KEY", "secret"),
            ("UPLOAD_DIR", "/var/tmp/up"),
            ("WEBHOOK_URL", "http://localhost:9/hook"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.ocr.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.storage.upload_dir, PathBuf::from("/var/tmp/up"));
        assert_eq!(cfg.webhook.url, "http://localhost:9/hook");
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut cfg = Config::default();
        let err = cfg.apply_env(|k| (k == "PORT").then(|| "nope".to_string()));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_window_invalid() {
        let mut cfg = Config::default();
        cfg.batch.window_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
