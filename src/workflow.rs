//! Preview/confirm/delete state machine
//!
//! A [`Session`] walks through
//! `Idle -> Previewing -> AwaitingConfirmation -> Deleting -> {Completed | Cancelled | Failed}`
//! and allows one operation at a time. Deletion runs as a lazily polled
//! stream of [`DeletionEvent`]s; cancellation is cooperative and is checked
//! before each batch.

use async_stream::stream;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::client::{search, GmailClient};
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::models::{
    DeleteOutcome, DeletionBatch, DeletionReport, FailureReason, FilterSpec, PreviewResult,
    ProgressUpdate, SearchQuery,
};
use crate::query;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Ids per delete call, further capped by the client's limit
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WorkflowSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.deletion.batch_size,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Snapshot of a session's state
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    Previewing,
    AwaitingConfirmation(PreviewResult),
    Deleting {
        preview: PreviewResult,
        progress: ProgressUpdate,
        report: DeletionReport,
    },
    Completed(DeletionReport),
    Cancelled(DeletionReport),
    Failed {
        error: String,
        requires_reauth: bool,
        /// Present when the failure happened during deletion
        report: Option<DeletionReport>,
    },
}

impl WorkflowState {
    /// A preview or deletion currently owns the session
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowState::Previewing | WorkflowState::Deleting { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Previewing => "previewing",
            WorkflowState::AwaitingConfirmation(_) => "awaiting confirmation",
            WorkflowState::Deleting { .. } => "deleting",
            WorkflowState::Completed(_) => "completed",
            WorkflowState::Cancelled(_) => "cancelled",
            WorkflowState::Failed { .. } => "failed",
        }
    }
}

/// How a deletion run ended
#[derive(Debug)]
pub enum DeletionOutcome {
    Completed(DeletionReport),
    Cancelled(DeletionReport),
    Failed {
        error: GmailError,
        report: DeletionReport,
    },
}

impl DeletionOutcome {
    pub fn report(&self) -> &DeletionReport {
        match self {
            DeletionOutcome::Completed(report)
            | DeletionOutcome::Cancelled(report)
            | DeletionOutcome::Failed { report, .. } => report,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeletionOutcome::Completed(_) => "completed",
            DeletionOutcome::Cancelled(_) => "cancelled",
            DeletionOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub enum DeletionEvent {
    /// All matching ids are known; emitted once before the first batch
    Listed {
        total_messages: usize,
        total_batches: usize,
    },
    BatchCompleted(ProgressUpdate),
    /// Always the last event
    Finished(DeletionOutcome),
}

pub type DeletionStream = Pin<Box<dyn Stream<Item = DeletionEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// The running deletion stops before its next batch
    Requested,
    PreviewDiscarded,
    NothingToCancel,
}

struct SessionInner {
    client: Arc<dyn GmailClient>,
    settings: WorkflowSettings,
    state: Mutex<WorkflowState>,
    cancel_requested: AtomicBool,
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkflowState) {
        debug!("Session state -> {}", state.name());
        *self.lock_state() = state;
    }

    fn record_progress(&self, update: ProgressUpdate, latest: &DeletionReport) {
        if let WorkflowState::Deleting { progress, report, .. } = &mut *self.lock_state() {
            *progress = update;
            *report = latest.clone();
        }
    }

    fn set_failed(&self, error: &GmailError, report: Option<DeletionReport>) {
        self.set_state(WorkflowState::Failed {
            error: error.to_string(),
            requires_reauth: error.requires_reauth(),
            report,
        });
    }
}

/// Releases the session if the operation holding it is dropped midway
struct ActivityGuard {
    inner: Arc<SessionInner>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        match &*state {
            WorkflowState::Previewing => *state = WorkflowState::Idle,
            WorkflowState::Deleting { report, .. } => {
                warn!(
                    "Deletion abandoned after {} of {} messages",
                    report.deleted + report.failed,
                    report.requested
                );
                *state = WorkflowState::Cancelled(report.clone());
            }
            _ => {}
        }
    }
}

enum ConfirmStep {
    Start(PreviewResult),
    Refresh(SearchQuery),
}

/// One user's preview/confirm/delete session
///
/// Clones share the same state; separate sessions never interfere.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(client: Arc<dyn GmailClient>, settings: WorkflowSettings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                settings,
                state: Mutex::new(WorkflowState::Idle),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.inner.lock_state().clone()
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.inner.settings
    }

    /// Count the messages matching `filter` without touching them
    pub async fn request_preview(&self, filter: &FilterSpec) -> Result<PreviewResult> {
        {
            let mut state = self.inner.lock_state();
            if state.is_active() {
                return Err(GmailError::OperationInProgress(format!(
                    "session is {}",
                    state.name()
                )));
            }
            *state = WorkflowState::Previewing;
        }

        self.preview_query(query::build(filter)).await
    }

    /// Delete everything matched by `confirmed`
    ///
    /// `confirmed` must be the preview the session is waiting on. A preview
    /// that no longer matches is refreshed and handed back as
    /// [`GmailError::StalePreview`] for the user to confirm again.
    pub async fn confirm_and_delete(&self, confirmed: &PreviewResult) -> Result<DeletionStream> {
        let step = {
            let mut state = self.inner.lock_state();
            match &*state {
                WorkflowState::AwaitingConfirmation(stored) if stored == confirmed => {
                    let preview = stored.clone();
                    self.inner.cancel_requested.store(false, Ordering::SeqCst);
                    *state = WorkflowState::Deleting {
                        preview: preview.clone(),
                        progress: ProgressUpdate::default(),
                        report: DeletionReport::default(),
                    };
                    ConfirmStep::Start(preview)
                }
                WorkflowState::AwaitingConfirmation(stored) => {
                    info!(
                        "Confirmed preview ({} for '{}') differs from stored preview ({} for '{}')",
                        confirmed.match_count, confirmed.query, stored.match_count, stored.query
                    );
                    *state = WorkflowState::Previewing;
                    ConfirmStep::Refresh(confirmed.query.clone())
                }
                current if current.is_active() => {
                    return Err(GmailError::OperationInProgress(format!(
                        "session is {}",
                        current.name()
                    )));
                }
                current => {
                    return Err(GmailError::NotAwaitingConfirmation(format!(
                        "session is {}",
                        current.name()
                    )));
                }
            }
        };

        match step {
            ConfirmStep::Start(preview) => Ok(self.deletion_stream(preview)),
            ConfirmStep::Refresh(query) => {
                let fresh = self.preview_query(Ok(query)).await?;
                Err(GmailError::StalePreview { fresh })
            }
        }
    }

    /// Stop the running deletion before its next batch, or drop a pending preview
    pub fn cancel(&self) -> CancelAck {
        let mut state = self.inner.lock_state();
        match &*state {
            WorkflowState::Deleting { .. } => {
                info!("Cancellation requested");
                self.inner.cancel_requested.store(true, Ordering::SeqCst);
                CancelAck::Requested
            }
            WorkflowState::AwaitingConfirmation(_) => {
                *state = WorkflowState::Idle;
                CancelAck::PreviewDiscarded
            }
            _ => CancelAck::NothingToCancel,
        }
    }

    /// Count pass; the session must already be in `Previewing`
    async fn preview_query(&self, query: Result<SearchQuery>) -> Result<PreviewResult> {
        let _guard = ActivityGuard {
            inner: Arc::clone(&self.inner),
        };

        let query = match query {
            Ok(query) => query,
            Err(e) => {
                self.inner.set_failed(&e, None);
                return Err(e);
            }
        };

        let client = self.inner.client.as_ref();
        let counted = self
            .inner
            .settings
            .retry
            .run("count", || client.count(&query))
            .await;

        match counted {
            Ok(match_count) => {
                info!("Preview: {} messages match '{}'", match_count, query);
                let preview = PreviewResult { match_count, query };
                self.inner
                    .set_state(WorkflowState::AwaitingConfirmation(preview.clone()));
                Ok(preview)
            }
            Err(e) => {
                warn!("Preview of '{}' failed: {}", query, e);
                self.inner.set_failed(&e, None);
                Err(e)
            }
        }
    }

    fn deletion_stream(&self, preview: PreviewResult) -> DeletionStream {
        let inner = Arc::clone(&self.inner);
        // Created outside the stream so an unpolled stream still releases the session
        let guard = ActivityGuard {
            inner: Arc::clone(&inner),
        };

        Box::pin(stream! {
            let _guard = guard;
            let client = inner.client.as_ref();
            let retry = inner.settings.retry;

            info!("Deleting messages matching '{}'", preview.query);

            let ids = match search(client, &preview.query).collect_all(&retry).await {
                Ok(ids) => ids,
                Err(error) => {
                    let report = DeletionReport::default();
                    inner.set_failed(&error, Some(report.clone()));
                    yield DeletionEvent::Finished(DeletionOutcome::Failed { error, report });
                    return;
                }
            };

            let batches = into_batches(ids, effective_batch_size(&inner.settings, client));
            let total_messages = batches.iter().map(|b| b.message_ids.len()).sum();
            yield DeletionEvent::Listed {
                total_messages,
                total_batches: batches.len(),
            };

            let mut report = DeletionReport::default();
            let mut progress = ProgressUpdate {
                batches_total: batches.len(),
                ..Default::default()
            };

            for batch in batches {
                if inner.cancel_requested.load(Ordering::SeqCst) {
                    info!(
                        "Deletion cancelled after {} of {} batches",
                        progress.batches_completed, progress.batches_total
                    );
                    inner.set_state(WorkflowState::Cancelled(report.clone()));
                    yield DeletionEvent::Finished(DeletionOutcome::Cancelled(report));
                    return;
                }

                match delete_with_retry(client, &batch, &retry).await {
                    Ok(outcomes) => {
                        report.record_batch(&outcomes);
                        progress.batches_completed += 1;
                        progress.deleted = report.deleted;
                        progress.failed = report.failed;

                        inner.record_progress(progress, &report);
                        yield DeletionEvent::BatchCompleted(progress);
                    }
                    Err(BatchFailure { settled, error }) => {
                        warn!("Batch {} failed: {}", batch.index + 1, error);
                        if !settled.is_empty() {
                            report.record_batch(&settled);
                            progress.deleted = report.deleted;
                            progress.failed = report.failed;
                            inner.record_progress(progress, &report);
                        }
                        inner.set_failed(&error, Some(report.clone()));
                        yield DeletionEvent::Finished(DeletionOutcome::Failed { error, report });
                        return;
                    }
                }
            }

            info!(
                "Deletion finished: {} trashed, {} failed",
                report.deleted, report.failed
            );
            inner.set_state(WorkflowState::Completed(report.clone()));
            yield DeletionEvent::Finished(DeletionOutcome::Completed(report));
        })
    }
}

fn effective_batch_size(settings: &WorkflowSettings, client: &dyn GmailClient) -> usize {
    settings.batch_size.min(client.max_batch_size()).max(1)
}

fn into_batches(ids: Vec<String>, batch_size: usize) -> Vec<DeletionBatch> {
    ids.chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| DeletionBatch {
            index,
            message_ids: chunk.to_vec(),
        })
        .collect()
}

/// A batch that stopped on an error after some of its ids were settled
#[derive(Debug)]
struct BatchFailure {
    /// Outcomes received before the error, in the batch's order
    settled: Vec<DeleteOutcome>,
    error: GmailError,
}

/// Delete one batch, re-submitting only the ids that failed transiently
///
/// Outcomes come back in the batch's order. Ids still failing after the
/// last retry are reported as `Transient` failures.
async fn delete_with_retry(
    client: &dyn GmailClient,
    batch: &DeletionBatch,
    retry: &RetryPolicy,
) -> std::result::Result<Vec<DeleteOutcome>, BatchFailure> {
    let mut settled: HashMap<String, DeleteOutcome> = HashMap::with_capacity(batch.message_ids.len());
    let mut pending = batch.message_ids.clone();
    let mut attempt = 0;

    loop {
        let outcomes = match retry
            .run("delete_batch", || client.delete_batch(&pending))
            .await
        {
            Ok(outcomes) => outcomes,
            Err(error) => {
                // Ids still pending were never confirmed either way
                let settled = batch
                    .message_ids
                    .iter()
                    .filter_map(|id| settled.remove(id))
                    .collect();
                return Err(BatchFailure { settled, error });
            }
        };

        let mut transient = Vec::new();
        for outcome in outcomes {
            if outcome.result == Err(FailureReason::Transient) && attempt < retry.max_retries {
                transient.push(outcome.message_id);
            } else {
                settled.insert(outcome.message_id.clone(), outcome);
            }
        }

        if transient.is_empty() {
            break;
        }

        attempt += 1;
        let delay = retry.delay_for(attempt);
        warn!(
            "Batch {}: {} messages failed transiently, retry {}/{} in {:?}",
            batch.index + 1,
            transient.len(),
            attempt,
            retry.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
        pending = transient;
    }

    Ok(batch
        .message_ids
        .iter()
        .map(|id| {
            settled
                .remove(id)
                .unwrap_or_else(|| DeleteOutcome::failed(id.as_str(), FailureReason::Transient))
        })
        .collect())
}
