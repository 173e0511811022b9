mod batch;
mod config;
mod decrypt;
mod duplicates;
mod error;
mod extract;
mod http;
mod ocr_client;
mod pdf_extract;
mod server;
mod storage;
mod submission;
mod webhook;

use batch::Batcher;
use config::{Config, DecryptMode};
use decrypt::{HttpDecryptor, PassthroughDecryptor, SubmissionDecryptor};
use ocr_client::HttpOcrClient;
use server::AppState;
use std::sync::Arc;
use std::time::Duration;
use storage::UploadDir;
use submission::Pipeline;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webhook::HttpWebhook;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before reading any settings
    let _ = dotenvy::dotenv();

    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    http::install_crypto_provider();

    let config_path =
        std::env::var("SUBMISSION_DEDUP_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = Config::load_or_default(&config_path)?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;

    if cfg.ocr.api_key.is_none() {
        warn!("OCR_API_KEY not set; every attachment will fail OCR");
    }

    let uploads = UploadDir::prepare(&cfg.storage.upload_dir)?;
    let sink = HttpWebhook::new(
        cfg.webhook.url.clone(),
        Duration::from_secs(cfg.webhook.timeout_secs),
    )?;
    let batcher = Batcher::new(&cfg.batch, Arc::new(sink));

    let decryptor: Arc<dyn SubmissionDecryptor> = match cfg.decrypt.mode {
        DecryptMode::Http => Arc::new(HttpDecryptor::new(
            cfg.decrypt.url.clone(),
            cfg.decrypt.form_secret_key.clone(),
            Duration::from_secs(cfg.decrypt.timeout_secs),
        )?),
        DecryptMode::Passthrough => {
            warn!("Decryption disabled: submissions are expected in plaintext");
            Arc::new(PassthroughDecryptor)
        }
    };

    let pipeline = Pipeline {
        ocr: Arc::new(HttpOcrClient::new(&cfg.ocr)?),
        batcher,
        uploads,
        eager_cleanup: cfg.storage.eager_cleanup,
    };

    info!(
        config = %config_path,
        window_secs = cfg.batch.window_secs,
        scope = ?cfg.batch.scope,
        webhook = %cfg.webhook.url,
        upload_dir = %pipeline.uploads.path().display(),
        "Starting submission receiver"
    );

    let state = AppState {
        decryptor,
        pipeline: Arc::new(pipeline),
        signature_header: cfg.server.signature_header.clone(),
    };

    server::serve(state, &cfg.server.host, cfg.server.port, cfg.server.body_limit_bytes).await
}
