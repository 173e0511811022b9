// src/submission.rs

use crate::batch::Batcher;
use crate::decrypt::DecryptedSubmission;
use crate::extract;
use crate::ocr_client::OcrService;
use crate::pdf_extract::{self, PdfContent};
use crate::storage::{self, UploadDir};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// Per-request tally returned to the form platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub responses_count: usize,
    pub attachments_processed: usize,
    pub attachments_skipped: usize,
    pub attachments_failed: usize,
}

/// Everything needed to turn attachments into batched name lists.
pub struct Pipeline {
    pub ocr: Arc<dyn OcrService>,
    pub batcher: Batcher,
    pub uploads: UploadDir,
    /// Delete each file right after OCR instead of at flush time.
    pub eager_cleanup: bool,
}

impl Pipeline {
    /// Process attachments one after another and feed results to the batcher.
    ///
    /// A failing attachment is logged and skipped; the others still count.
    pub async fn process(&self, submission_id: &str, submission: DecryptedSubmission) -> SubmissionReport {
        let mut report = SubmissionReport {
            responses_count: submission.responses.len(),
            ..SubmissionReport::default()
        };
        let email = submission.email();
        let session = self.batcher.session_key(submission_id);

        info!(
            submission = %submission_id,
            responses = report.responses_count,
            attachments = submission.attachments.len(),
            has_email = email.is_some(),
            "Processing submission"
        );

        for (field_id, attachment) in submission.attachments {
            let span = info_span!("attachment", field = %field_id, filename = %attachment.filename);

            let is_pdf = pdf_extract::is_pdf(&attachment.content);
            span.in_scope(|| {
                info!(bytes = attachment.content.len(), is_pdf, "Attachment received");
            });
            if !is_pdf {
                report.attachments_skipped += 1;
                continue;
            }

            let outcome = self
                .process_attachment(submission_id, &field_id, &attachment.filename, &attachment.content)
                .instrument(span.clone())
                .await;

            match outcome {
                Some((result, path)) => {
                    let artifacts = if self.eager_cleanup {
                        storage::remove_files(std::slice::from_ref(&path)).await;
                        Vec::new()
                    } else {
                        vec![path]
                    };
                    self.batcher
                        .add_data(&session, result, email.clone(), artifacts)
                        .instrument(span)
                        .await;
                    report.attachments_processed += 1;
                }
                None => report.attachments_failed += 1,
            }
        }

        info!(
            submission = %submission_id,
            processed = report.attachments_processed,
            skipped = report.attachments_skipped,
            failed = report.attachments_failed,
            "Submission done"
        );
        report
    }

    /// Write, inspect and OCR one PDF. `None` when it contributes nothing.
    async fn process_attachment(
        &self,
        submission_id: &str,
        field_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Option<(extract::ExtractionResult, std::path::PathBuf)> {
        let path = match self.uploads.write(submission_id, field_id, filename, bytes).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Could not store attachment");
                return None;
            }
        };

        match pdf_extract::inspect_pdf_blocking(bytes.to_vec()).await {
            PdfContent::TextLayer { pages, chars } => info!(pages, chars, "Sending text PDF to OCR"),
            PdfContent::Scanned { pages } => info!(pages, "Sending scanned PDF to OCR"),
            PdfContent::Unreadable(reason) => warn!(reason = %reason, "Sending unreadable PDF to OCR anyway"),
        }

        match self.ocr.extract(&path).await {
            Ok(raw) => {
                let result = extract::extract(&raw);
                if result.is_empty() {
                    warn!("OCR response had no recognisable fields");
                }
                info!(
                    employees = result.employee_names.len(),
                    companies = result.company_names.len(),
                    ic_numbers = result.ic_numbers.len(),
                    "Fields extracted"
                );
                Some((result, path))
            }
            Err(e) => {
                warn!(error = %e, "OCR failed, attachment skipped");
                storage::remove_files(std::slice::from_ref(&path)).await;
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::batch::tests::RecordingSink;
    use crate::batch::{FlushOutcome, SHARED_SESSION};
    use crate::config::BatchConfig;
    use crate::decrypt::{Attachment, FormResponse};
    use crate::error::OcrError;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::path::Path;

    /// Returns a fixed response, or fails for files whose name contains "broken".
    pub(crate) struct FixedOcr(pub Value);

    #[async_trait]
    impl OcrService for FixedOcr {
        async fn extract(&self, path: &Path) -> Result<Value, OcrError> {
            if path.to_string_lossy().contains("broken") {
                return Err(OcrError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            assert!(path.exists(), "attachment must be on disk during OCR");
            Ok(self.0.clone())
        }
    }

    fn pipeline(dir: &Path, eager_cleanup: bool) -> (Pipeline, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let ocr = FixedOcr(json!({
            "document": { "value": { "response": {
                "value": "{\"employee_names\": \"Lim, Tan, Lim\", \"company_names\": \"Acme, Acme\"}"
            } } }
        }));
        let pipeline = Pipeline {
            ocr: Arc::new(ocr),
            batcher: Batcher::new(&BatchConfig::default(), sink.clone()),
            uploads: UploadDir::prepare(dir).unwrap(),
            eager_cleanup,
        };
        (pipeline, sink)
    }

    fn submission(files: &[(&str, &str, &[u8])]) -> DecryptedSubmission {
        DecryptedSubmission {
            responses: vec![FormResponse {
                question: Some("Email".into()),
                answer: Some(json!("owner@x.sg")),
            }],
            attachments: files
                .iter()
                .map(|(field, name, bytes)| {
                    (
                        field.to_string(),
                        Attachment {
                            filename: name.to_string(),
                            content: bytes.to_vec(),
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_duplicate_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, sink) = pipeline(dir.path(), true);

        let report = pipeline
            .process("sub-1", submission(&[("f1", "staff.pdf", b"%PDF-1.4 fake")]))
            .await;
        assert_eq!(report.attachments_processed, 1);

        let FlushOutcome::Delivered(payload) = pipeline.batcher.flush(SHARED_SESSION).await else {
            panic!("expected delivery");
        };
        assert_eq!(payload.email.as_deref(), Some("owner@x.sg"));
        assert_eq!(payload.employee_duplicates_count, 1);
        assert_eq!(payload.employee_duplicate_names, vec!["Lim".to_string()]);
        assert_eq!(payload.company_duplicates_count, 1);
        assert_eq!(payload.company_duplicate_names, vec!["Acme".to_string()]);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_non_pdf_and_survives_ocr_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _sink) = pipeline(dir.path(), true);

        let report = pipeline
            .process(
                "sub-2",
                submission(&[
                    ("f1", "photo.png", b"\x89PNG"),
                    ("f2", "broken.pdf", b"%PDF-1.4"),
                    ("f3", "ok.pdf", b"%PDF-1.4"),
                ]),
            )
            .await;

        assert_eq!(report.responses_count, 1);
        assert_eq!(report.attachments_skipped, 1);
        assert_eq!(report.attachments_failed, 1);
        assert_eq!(report.attachments_processed, 1);

        let snapshot = pipeline.batcher.snapshot(SHARED_SESSION).await;
        assert_eq!(snapshot.employee_names.len(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_deferred_cleanup_registers_files_with_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _sink) = pipeline(dir.path(), false);

        pipeline
            .process("sub-3", submission(&[("f1", "a.pdf", b"%PDF-1.4"), ("f2", "b.pdf", b"%PDF-1.4")]))
            .await;

        let snapshot = pipeline.batcher.snapshot(SHARED_SESSION).await;
        assert_eq!(snapshot.artifacts.len(), 2);
        assert!(snapshot.artifacts.iter().all(|p| p.exists()));
        assert_eq!(snapshot.employee_names.len(), 6);

        pipeline.batcher.flush(SHARED_SESSION).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pdf_that_breaks_local_parser_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _sink) = pipeline(dir.path(), true);
        let odd = crate::pdf_extract::tests::pdf_with_undeclared_font();

        let report = pipeline
            .process(
                "sub-4",
                submission(&[("f1", "odd.pdf", odd.as_slice()), ("f2", "ok.pdf", b"%PDF-1.4")]),
            )
            .await;

        assert_eq!(report.attachments_processed, 2);
        assert_eq!(report.attachments_failed, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        let snapshot = pipeline.batcher.snapshot(SHARED_SESSION).await;
        assert_eq!(snapshot.employee_names.len(), 6);
    }
}
