//! Time-windowed accumulation of extracted names and the flush that
//! summarises duplicates for the downstream webhook.
//!
//! Every `add_data` re-arms the session's inactivity timer. When the timer
//! fires undisturbed the session is flushed: duplicate counts go out through
//! the [`WebhookSink`], and only a confirmed delivery clears the buffers and
//! removes the session's transient files.

use crate::config::{BatchConfig, BatchScope};
use crate::duplicates::count_duplicates;
use crate::extract::ExtractionResult;
use crate::storage;
use crate::webhook::WebhookSink;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Session key used when every submission shares one batch.
pub const SHARED_SESSION: &str = "shared";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IcDuplicates {
    Yes,
    No,
}

/// Body POSTed to the downstream webhook on flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryPayload {
    pub email: Option<String>,
    pub employee_duplicates_count: usize,
    pub employee_duplicate_names: Vec<String>,
    pub company_duplicates_count: usize,
    pub company_duplicate_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ic_duplicates: Option<IcDuplicates>,
}

/// The armed flush for a session.
#[derive(Debug)]
struct PendingFlush {
    id: u64,
    handle: JoinHandle<()>,
}

/// Buffered extraction results for one session.
#[derive(Debug, Default)]
struct BatchState {
    employee_names: Vec<String>,
    company_names: Vec<String>,
    ic_numbers: Vec<String>,
    email: Option<String>,
    artifacts: Vec<PathBuf>,
    pending: Option<PendingFlush>,
}

/// Read-only view of a session's buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub employee_names: Vec<String>,
    pub company_names: Vec<String>,
    pub ic_numbers: Vec<String>,
    pub email: Option<String>,
    pub artifacts: Vec<PathBuf>,
    pub timer_armed: bool,
}

impl BatchState {
    fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            employee_names: self.employee_names.clone(),
            company_names: self.company_names.clone(),
            ic_numbers: self.ic_numbers.clone(),
            email: self.email.clone(),
            artifacts: self.artifacts.clone(),
            timer_armed: self.pending.is_some(),
        }
    }

    fn summarize(&self, include_ic: bool) -> SummaryPayload {
        let employees = count_duplicates(&self.employee_names);
        let companies = count_duplicates(&self.company_names);
        let ic_duplicates = include_ic.then(|| {
            if count_duplicates(&self.ic_numbers).count > 0 {
                IcDuplicates::Yes
            } else {
                IcDuplicates::No
            }
        });

        SummaryPayload {
            email: self.email.clone(),
            employee_duplicates_count: employees.count,
            employee_duplicate_names: employees.names,
            company_duplicates_count: companies.count,
            company_duplicate_names: companies.names,
            ic_duplicates,
        }
    }
}

/// What a flush did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Payload accepted downstream; buffers cleared and files removed.
    Delivered(SummaryPayload),
    /// Delivery failed; buffers and files kept for the next flush.
    Failed(String),
    /// Nothing buffered under that key.
    NoSession,
}

struct Inner {
    sessions: Mutex<HashMap<String, BatchState>>,
    sink: Arc<dyn WebhookSink>,
    window: Duration,
    scope: BatchScope,
    include_ic: bool,
    next_timer_id: AtomicU64,
}

/// Shared handle to the batching sessions. Cheap to clone.
#[derive(Clone)]
pub struct Batcher {
    inner: Arc<Inner>,
}

impl Batcher {
    pub fn new(config: &BatchConfig, sink: Arc<dyn WebhookSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                sink,
                window: config.window(),
                scope: config.scope,
                include_ic: config.include_ic_duplicates,
                next_timer_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    pub fn scope(&self) -> BatchScope {
        self.inner.scope
    }

    pub fn sink_target(&self) -> &str {
        self.inner.sink.target()
    }

    /// Session key a submission's results are batched under.
    pub fn session_key(&self, submission_id: &str) -> String {
        match self.inner.scope {
            BatchScope::Shared => SHARED_SESSION.to_string(),
            BatchScope::PerSubmission => submission_id.to_string(),
        }
    }

    /// Append one attachment's results and restart the inactivity window.
    pub async fn add_data(
        &self,
        key: &str,
        result: ExtractionResult,
        email: Option<String>,
        artifacts: Vec<PathBuf>,
    ) {
        let mut sessions = self.inner.sessions.lock().await;
        let state = sessions.entry(key.to_string()).or_default();

        state.employee_names.extend(result.employee_names);
        state.company_names.extend(result.company_names);
        state.ic_numbers.extend(result.ic_numbers);
        state.artifacts.extend(artifacts);
        if email.is_some() {
            state.email = email;
        }

        if let Some(previous) = state.pending.take() {
            previous.handle.abort();
            debug!(session = %key, timer = previous.id, "Cancelled pending flush");
        }

        let id = self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let batcher = self.clone();
        let timer_key = key.to_string();
        let window = self.inner.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            batcher.fire(&timer_key, id).await;
        });
        state.pending = Some(PendingFlush { id, handle });

        info!(
            session = %key,
            employees = state.employee_names.len(),
            companies = state.company_names.len(),
            ic_numbers = state.ic_numbers.len(),
            window_secs = window.as_secs(),
            "Batch updated, flush scheduled"
        );
    }

    /// Timer entry point: only the most recently armed timer may flush.
    async fn fire(&self, key: &str, timer_id: u64) {
        let mut sessions = self.inner.sessions.lock().await;
        let Some(state) = sessions.get_mut(key) else {
            return;
        };
        match &state.pending {
            Some(pending) if pending.id == timer_id => {}
            _ => {
                debug!(session = %key, timer = timer_id, "Superseded timer ignored");
                return;
            }
        }
        // Our own handle; dropping it detaches rather than cancels.
        state.pending = None;
        self.flush_locked(&mut sessions, key).await;
    }

    /// Flush a session now, cancelling its timer.
    pub async fn flush(&self, key: &str) -> FlushOutcome {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(pending) = sessions.get_mut(key).and_then(|s| s.pending.take()) {
            pending.handle.abort();
        }
        self.flush_locked(&mut sessions, key).await
    }

    /// Flush every session holding data, e.g. on shutdown.
    pub async fn flush_all(&self) -> Vec<(String, FlushOutcome)> {
        let keys: Vec<String> = self.inner.sessions.lock().await.keys().cloned().collect();
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.flush(&key).await;
            outcomes.push((key, outcome));
        }
        outcomes
    }

    async fn flush_locked(
        &self,
        sessions: &mut HashMap<String, BatchState>,
        key: &str,
    ) -> FlushOutcome {
        let Some(state) = sessions.get_mut(key) else {
            return FlushOutcome::NoSession;
        };
        state.pending = None;

        let payload = state.summarize(self.inner.include_ic);
        info!(
            session = %key,
            employee_duplicates = payload.employee_duplicates_count,
            company_duplicates = payload.company_duplicates_count,
            ic_duplicates = ?payload.ic_duplicates,
            "Flushing batch"
        );

        if let Err(e) = self.inner.sink.send(&payload).await {
            error!(
                session = %key,
                error = %e,
                retained_employees = state.employee_names.len(),
                retained_files = state.artifacts.len(),
                "Summary delivery failed, keeping batch"
            );
            return FlushOutcome::Failed(e.to_string());
        }

        let removed = storage::remove_files(&state.artifacts).await;
        if removed < state.artifacts.len() {
            warn!(
                session = %key,
                removed,
                total = state.artifacts.len(),
                "Some transient files could not be removed"
            );
        }

        sessions.remove(key);
        info!(session = %key, "Batch delivered and cleared");
        FlushOutcome::Delivered(payload)
    }

    /// Current buffers for `key`; empty if nothing is pending.
    pub async fn snapshot(&self, key: &str) -> BatchSnapshot {
        self.inner
            .sessions
            .lock()
            .await
            .get(key)
            .map(BatchState::snapshot)
            .unwrap_or_default()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Delete every file still held by a session, keeping the buffered names.
    /// Used at shutdown, after the final flush, so nothing outlives the process.
    pub async fn release_files(&self) -> usize {
        let mut sessions = self.inner.sessions.lock().await;
        let mut removed = 0;
        for (key, state) in sessions.iter_mut() {
            if state.artifacts.is_empty() {
                continue;
            }
            let artifacts = std::mem::take(&mut state.artifacts);
            let gone = storage::remove_files(&artifacts).await;
            warn!(session = %key, removed = gone, total = artifacts.len(), "Released files of undelivered batch");
            removed += gone;
        }
        removed
    }
}
