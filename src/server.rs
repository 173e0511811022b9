//! Inbound webhook endpoint for form submissions.

use crate::batch::{Batcher, FlushOutcome};
use crate::decrypt::SubmissionDecryptor;
use crate::error::DecryptError;
use crate::submission::Pipeline;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub decryptor: Arc<dyn SubmissionDecryptor>,
    pub pipeline: Arc<Pipeline>,
    pub signature_header: String,
}

impl AppState {
    fn batcher(&self) -> &Batcher {
        &self.pipeline.batcher
    }
}

/// Handler failures mapped onto the status codes the form platform sees.
#[derive(Debug)]
pub enum ApiError {
    MissingSignature,
    BadRequest(&'static str),
    Decrypt(Option<DecryptError>),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingSignature => {
                (StatusCode::UNAUTHORIZED, "Unauthorized: missing signature".to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            ApiError::Decrypt(cause) => {
                match cause {
                    Some(e) => error!(error = %e, "Decryption failed"),
                    None => error!("Decryption returned nothing (key mismatch or expired URL)"),
                }
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Unprocessable: decryption failed".to_string(),
                )
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub data: Option<Value>,
}

/// Create the main router with all routes.
pub fn create_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/webhook-status", get(webhook_status))
        .route("/batches/:session", get(batch_snapshot))
        .route("/submissions", post(receive_submission))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn root() -> &'static str {
    "Server is running!"
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn webhook_status(State(state): State<AppState>) -> impl IntoResponse {
    let batcher = state.batcher();
    Json(json!({
        "status": "ok",
        "webhookUri": batcher.sink_target(),
        "windowSecs": batcher.window().as_secs(),
        "scope": batcher.scope(),
        "pendingSessions": batcher.session_count().await,
    }))
}

/// Buffered names for one session, e.g. `/batches/shared`.
async fn batch_snapshot(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> impl IntoResponse {
    Json(state.batcher().snapshot(&session).await)
}

/// Stable id for a submission: the platform's own id, else a digest of the envelope.
fn submission_id(data: &Value) -> String {
    if let Some(id) = data.get("submissionId").and_then(Value::as_str) {
        return id.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(data.to_string().as_bytes());
    format!("{:x}", hasher.finalize())[..24].to_string()
}

async fn receive_submission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<WebhookBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !headers.contains_key(state.signature_header.as_str()) {
        warn!(header = %state.signature_header, "Submission without signature header");
        return Err(ApiError::MissingSignature);
    }

    let data = body.data.ok_or(ApiError::BadRequest("Bad Request: 'data' field missing"))?;
    let id = submission_id(&data);

    let submission = state
        .decryptor
        .decrypt(&data)
        .await
        .map_err(|e| ApiError::Decrypt(Some(e)))?
        .ok_or(ApiError::Decrypt(None))?;

    let report = state.pipeline.process(&id, submission).await;

    Ok(Json(json!({
        "ok": true,
        "responsesCount": report.responses_count,
        "attachmentsProcessed": report.attachments_processed,
        "attachmentsSkipped": report.attachments_skipped,
        "attachmentsFailed": report.attachments_failed,
    })))
}

/// Start the web server; pending batches are flushed once it stops.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    body_limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let batcher = state.batcher().clone();
    let app = create_router(state, body_limit);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, flushing pending batches");
    for (session, outcome) in batcher.flush_all().await {
        match outcome {
            FlushOutcome::Delivered(_) => info!(session = %session, "Final flush delivered"),
            FlushOutcome::Failed(reason) => {
                error!(session = %session, reason = %reason, "Final flush failed, batch lost")
            }
            FlushOutcome::NoSession => {}
        }
    }
    let released = batcher.release_files().await;
    if released > 0 {
        warn!(released, "Removed transient files of undelivered batches");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SHARED_SESSION;
    use crate::batch::tests::RecordingSink;
    use crate::config::BatchConfig;
    use crate::decrypt::PassthroughDecryptor;
    use crate::storage::UploadDir;
    use crate::submission::tests::FixedOcr;
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tower::ServiceExt;

    fn setup_test_app(dir: &std::path::Path) -> (Router, AppState) {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline {
            ocr: Arc::new(FixedOcr(json!({ "value": "{\"employee_names\": \"Lim, Lim\"}" }))),
            batcher: Batcher::new(&BatchConfig::default(), sink),
            uploads: UploadDir::prepare(dir).unwrap(),
            eager_cleanup: true,
        };
        let state = AppState {
            decryptor: Arc::new(PassthroughDecryptor),
            pipeline: Arc::new(pipeline),
            signature_header: "X-FormSG-Signature".to_string(),
        };
        (create_router(state.clone(), 10 * 1024 * 1024), state)
    }

    fn post_submission(body: Value, signed: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/submissions")
            .header("content-type", "application/json");
        if signed {
            builder = builder.header("X-FormSG-Signature", "t=1,s=abc,f=form,v1=sig");
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _state) = setup_test_app(dir.path());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_signature_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = setup_test_app(dir.path());

        let response = app
            .oneshot(post_submission(json!({ "data": {} }), false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.batcher().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_data_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _state) = setup_test_app(dir.path());

        let response = app
            .oneshot(post_submission(json!({ "other": 1 }), true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_undecryptable_is_422_without_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = setup_test_app(dir.path());

        let response = app
            .oneshot(post_submission(json!({ "data": "ciphertext" }), true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.batcher().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_submission_with_pdf_is_batched() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = setup_test_app(dir.path());

        let data = json!({
            "submissionId": "abc123",
            "responses": [{ "_id": "q", "question": "Your email", "answer": "me@x.sg" }],
            "attachments": {
                "f1": { "filename": "names.pdf", "content": STANDARD.encode(b"%PDF-1.4 body") },
                "f2": { "filename": "notes.txt", "content": STANDARD.encode(b"hello") }
            }
        });
        let response = app
            .oneshot(post_submission(json!({ "data": data }), true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["responsesCount"], 1);
        assert_eq!(json["attachmentsProcessed"], 1);
        assert_eq!(json["attachmentsSkipped"], 1);

        let snapshot = state.batcher().snapshot(SHARED_SESSION).await;
        assert_eq!(snapshot.employee_names, vec!["Lim".to_string(), "Lim".to_string()]);
        assert_eq!(snapshot.email.as_deref(), Some("me@x.sg"));
        assert!(snapshot.timer_armed);
    }

    #[tokio::test]
    async fn test_webhook_status_reports_batcher() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _state) = setup_test_app(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook-status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["webhookUri"], "memory://sink");
        assert_eq!(json["windowSecs"], 20);
        assert_eq!(json["scope"], "shared");
        assert_eq!(json["pendingSessions"], 0);
    }

    #[tokio::test]
    async fn test_batch_snapshot_route() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = setup_test_app(dir.path());
        state
            .batcher()
            .add_data(
                SHARED_SESSION,
                crate::extract::ExtractionResult {
                    company_names: vec!["Acme".to_string()],
                    ..Default::default()
                },
                None,
                vec![],
            )
            .await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/batches/shared")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["companyNames"][0], "Acme");
        assert_eq!(json["timerArmed"], true);
        assert!(json["email"].is_null());
    }

    #[test]
    fn test_submission_id_prefers_platform_id() {
        assert_eq!(submission_id(&json!({ "submissionId": "s-1" })), "s-1");
        let a = submission_id(&json!({ "encryptedContent": "x" }));
        let b = submission_id(&json!({ "encryptedContent": "y" }));
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
    }
}
