//! Print job service - coordinates sessions and printing.
//!
//! Every request is re-checked against the owning session before it reaches
//! the print manager. Job transitions are audited, written to the
//! transaction ledger and fanned out to status listeners.

use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use super::listener::{StatusBroadcaster, StatusListener, StatusUpdate};
use crate::audit::{event_types, AuditLogger, TransactionOutcome, TransactionRecord};
use crate::failsafe::ErrorHandler;
use crate::printing::{
    calculate_price, JobProgress, JobStatus, PriceBreakdown, PrintJob, PrintManager,
    PrintOptionsInput, PrintResult, PrinterStatus, QueueStatus, CANCELLED_REASON,
};
use crate::session::{FileMetadata, SessionManager, SessionStatus};
use crate::types::{Error, FileId, JobId, ListenerId, PricingConfig, Result, SessionId};
use crate::validation::{validate_file_list, validate_print_options};

/// Which execution path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Facade used by the kiosk frontend and shopkeeper tools.
pub struct PrintJobService {
    sessions: Arc<SessionManager>,
    printing: Arc<PrintManager>,
    audit: Arc<AuditLogger>,
    errors: Arc<ErrorHandler>,
    pricing: PricingConfig,
    broadcaster: Arc<StatusBroadcaster>,
}

impl std::fmt::Debug for PrintJobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintJobService")
            .field("listeners", &self.broadcaster.len())
            .finish_non_exhaustive()
    }
}

impl PrintJobService {
    /// Build the service and subscribe to the print manager's progress.
    pub async fn new(
        sessions: Arc<SessionManager>,
        printing: Arc<PrintManager>,
        audit: Arc<AuditLogger>,
        errors: Arc<ErrorHandler>,
        pricing: PricingConfig,
    ) -> Self {
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let bridge = broadcaster.clone();
        printing
            .add_observer(Arc::new(move |progress: &JobProgress| {
                bridge.dispatch(&status_update(progress));
            }))
            .await;
        Self {
            sessions,
            printing,
            audit,
            errors,
            pricing,
            broadcaster,
        }
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn register_listener(&self, listener: Arc<dyn StatusListener>) -> ListenerId {
        self.broadcaster.register(listener)
    }

    pub fn unregister_listener(&self, id: &ListenerId) -> bool {
        self.broadcaster.unregister(id)
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Validate and queue a job for a session's files.
    pub async fn create_print_job(
        &self,
        session_id: &SessionId,
        file_ids: Vec<FileId>,
        options: &PrintOptionsInput,
    ) -> Result<PrintJob> {
        let pricing = self.calculate_price(session_id, &file_ids, options).await?;
        let job_id = self
            .printing
            .queue_print_job(session_id, file_ids, options, pricing)
            .await?;
        let job = self.require_job(&job_id).await?;

        self.audit
            .record(
                Some(session_id),
                event_types::JOB_CREATED,
                json!({
                    "jobId": job.id,
                    "fileCount": job.files.len(),
                    "options": job.options,
                    "pricing": job.pricing,
                }),
            )
            .await;
        self.write_ledger(&job, TransactionOutcome::Created).await;
        tracing::info!(
            "print_job_created: job_id={}, session_id={}, total_pages={}, total_price={}",
            job.id,
            session_id,
            job.pricing.total_pages,
            job.pricing.total_price
        );

        self.broadcaster.dispatch(&StatusUpdate {
            job_id: job.id.clone(),
            session_id: session_id.clone(),
            status: JobStatus::Queued,
            progress: 0,
            message: Some("queued".to_string()),
            error: None,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    /// Price a prospective job without queueing it.
    pub async fn calculate_price(
        &self,
        session_id: &SessionId,
        file_ids: &[FileId],
        options: &PrintOptionsInput,
    ) -> Result<PriceBreakdown> {
        let files = self.resolve_files(session_id, file_ids).await?;
        let options = validate_print_options(options)?;
        let page_counts: Vec<Option<u32>> = files.iter().map(|f| f.page_count).collect();
        calculate_price(&page_counts, &options, &self.pricing)
    }

    /// Execute a queued job. The session is Printing for the duration.
    pub async fn execute_print_job(&self, job_id: &JobId) -> Result<PrintResult> {
        self.run(job_id, Attempt::First).await
    }

    /// Re-run a failed job.
    pub async fn retry_print_job(&self, job_id: &JobId) -> Result<PrintResult> {
        self.run(job_id, Attempt::Retry).await
    }

    /// Cancel a job that has not completed.
    ///
    /// The cancel owns the job's closing ledger record; an execute call still
    /// in flight for it returns without writing another.
    pub async fn cancel_print_job(&self, job_id: &JobId) -> Result<()> {
        let job = self.require_job(job_id).await?;
        self.printing.cancel_print_job(job_id).await?;

        self.audit
            .record(
                Some(&job.session_id),
                event_types::JOB_CANCELLED,
                json!({ "jobId": job_id, "previousStatus": job.status }),
            )
            .await;
        if !job.status.is_finished() {
            self.write_ledger(&job, TransactionOutcome::Failed).await;
        }
        if job.status == JobStatus::Printing {
            self.settle_session(&job.session_id, SessionStatus::Active).await;
        }
        Ok(())
    }

    /// Cancel a closing session's unfinished jobs, then drop all of its jobs.
    ///
    /// Returns `(cancelled, removed)`.
    pub async fn close_session_jobs(&self, session_id: &SessionId) -> (usize, usize) {
        let mut cancelled = 0;
        for job in self.printing.get_session_jobs(session_id).await {
            if job.status.is_finished() {
                continue;
            }
            match self.cancel_print_job(&job.id).await {
                Ok(()) => cancelled += 1,
                Err(e) => tracing::warn!("session_job_cancel_failed: job_id={}, error={}", job.id, e),
            }
        }
        let removed = self.printing.cleanup_session_jobs(session_id).await;
        (cancelled, removed)
    }

    pub async fn get_job_status(&self, job_id: &JobId) -> Option<PrintJob> {
        self.printing.get_job(job_id).await
    }

    pub async fn get_session_jobs(&self, session_id: &SessionId) -> Vec<PrintJob> {
        self.printing.get_session_jobs(session_id).await
    }

    pub async fn get_printer_status(&self) -> Result<PrinterStatus> {
        self.printing.get_printer_status().await
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        self.printing.get_queue_status().await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn run(&self, job_id: &JobId, attempt: Attempt) -> Result<PrintResult> {
        let job = self.require_job(job_id).await?;
        let session = self.sessions.require_usable(&job.session_id).await?;
        let files_dir = self.files_dir(&job.session_id).await?;
        let previous = session.status;

        self.sessions
            .update_session_status(&job.session_id, SessionStatus::Printing)
            .await?;
        let started_event = match attempt {
            Attempt::First => event_types::JOB_STARTED,
            Attempt::Retry => event_types::JOB_RETRIED,
        };
        self.audit
            .record(
                Some(&job.session_id),
                started_event,
                json!({ "jobId": job_id, "retryCount": job.retry_count }),
            )
            .await;

        let outcome = match attempt {
            Attempt::First => self.printing.execute_print_job(job_id, &files_dir).await,
            Attempt::Retry => self.printing.retry_print_job(job_id, &files_dir).await,
        };

        match outcome {
            Ok(result) if superseded(&result) => {
                // A cancel, or the retry that followed one, owns the outcome.
                tracing::debug!("print_run_superseded: job_id={}, status={}", job_id, result.status);
                Ok(result)
            }
            Ok(result) => {
                let (event, ledger, next) = if result.success {
                    (event_types::JOB_COMPLETED, TransactionOutcome::Completed, SessionStatus::Completed)
                } else {
                    (event_types::JOB_FAILED, TransactionOutcome::Failed, SessionStatus::Active)
                };
                self.audit
                    .record(
                        Some(&job.session_id),
                        event,
                        json!({
                            "jobId": job_id,
                            "filesPrinted": result.files_printed,
                            "durationMs": result.duration_ms,
                            "error": result.error,
                        }),
                    )
                    .await;
                self.write_ledger(&job, ledger).await;
                self.settle_session(&job.session_id, next).await;
                if let Some(category) = result.failure_category {
                    let message = format!(
                        "print job {} failed: {}",
                        job_id,
                        result.error.as_deref().unwrap_or("unknown")
                    );
                    self.errors.handle_error(Some(category), None, &message).await;
                }
                Ok(result)
            }
            Err(e) => {
                // Rejected before anything printed; the job keeps its status.
                self.audit
                    .record(
                        Some(&job.session_id),
                        event_types::JOB_FAILED,
                        json!({ "jobId": job_id, "rejected": true, "error": e.to_string() }),
                    )
                    .await;
                tracing::warn!("print_job_rejected: job_id={}, error={}", job_id, e);
                self.settle_session(&job.session_id, previous).await;
                if matches!(e, Error::Unavailable(_)) {
                    self.errors.handle(&e).await;
                }
                Err(e)
            }
        }
    }

    /// Move the session to `next` unless another of its jobs is still printing.
    async fn settle_session(&self, session_id: &SessionId, next: SessionStatus) {
        let still_printing = self
            .printing
            .get_session_jobs(session_id)
            .await
            .iter()
            .any(|j| j.status == JobStatus::Printing);
        if still_printing {
            return;
        }
        if let Err(e) = self.sessions.update_session_status(session_id, next).await {
            // The session may have been terminated while the job ran.
            tracing::debug!(
                "session_status_not_updated: session_id={}, target={:?}, error={}",
                session_id,
                next,
                e
            );
        }
    }

    async fn resolve_files(
        &self,
        session_id: &SessionId,
        file_ids: &[FileId],
    ) -> Result<Vec<FileMetadata>> {
        let session = self.sessions.require_usable(session_id).await?;
        validate_file_list(file_ids, self.pricing.max_files_per_job)?;
        file_ids
            .iter()
            .map(|id| {
                session
                    .find_file(id)
                    .cloned()
                    .ok_or_else(|| Error::not_found(format!("file {}", id)))
            })
            .collect()
    }

    async fn files_dir(&self, session_id: &SessionId) -> Result<PathBuf> {
        self.sessions
            .get_session_files_directory(session_id)
            .await
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))
    }

    async fn require_job(&self, job_id: &JobId) -> Result<PrintJob> {
        self.printing
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))
    }

    async fn write_ledger(&self, job: &PrintJob, outcome: TransactionOutcome) {
        let record = TransactionRecord {
            session_id: job.session_id.clone(),
            total_price: job.pricing.total_price,
            total_pages: job.pricing.total_pages,
            timestamp: Utc::now(),
            job_id: job.id.clone(),
            outcome,
        };
        if let Err(e) = self.audit.log_transaction(&record).await {
            tracing::error!("ledger_write_failed: job_id={}, error={}", job.id, e);
        }
    }
}

/// Whether a run ended by cancellation or lost its job to a later retry.
fn superseded(result: &PrintResult) -> bool {
    !result.status.is_finished() || result.error.as_deref() == Some(CANCELLED_REASON)
}

fn status_update(progress: &JobProgress) -> StatusUpdate {
    StatusUpdate {
        job_id: progress.job_id.clone(),
        session_id: progress.session_id.clone(),
        status: progress.status,
        progress: progress.progress,
        message: progress.message.clone(),
        error: progress.error.clone(),
        timestamp: Utc::now(),
    }
}
