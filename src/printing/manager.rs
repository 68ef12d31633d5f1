//! Print manager - printer discovery and job execution.
//!
//! Jobs live in an in-memory map. Execution is bounded by a ceiling of
//! concurrently executing jobs; requests beyond it fail immediately instead of
//! waiting. Each executing job owns a cancellation token that reaches the
//! spooler's subprocess.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::backend::PrinterBackend;
use super::spooler::PrintSpooler;
use super::types::{
    JobProgress, JobStatus, PriceBreakdown, PrintJob, PrintOptionsInput, PrintResult,
    PrinterInfo, PrinterState, PrinterStatus, ProgressObserver, QueueStatus,
};
use crate::audit::{event_types, AuditLogger};
use crate::failsafe::{with_recovery, ErrorCategory};
use crate::types::{Error, FileId, JobId, PrinterConfig, Result, SessionId};
use crate::validation::{validate_non_empty, validate_print_options};

/// Reason recorded on jobs cancelled by request.
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Default)]
struct PrinterCache {
    printers: Vec<PrinterInfo>,
    default_printer: Option<String>,
    refreshed_at: Option<Instant>,
}

#[derive(Debug)]
struct Execution {
    seq: u64,
    token: CancellationToken,
}

/// Releases an execution slot when the executing call ends, however it ends.
struct ExecutionSlot<'a> {
    manager: &'a PrintManager,
    job_id: JobId,
    seq: u64,
}

impl Drop for ExecutionSlot<'_> {
    fn drop(&mut self) {
        let mut executions = self.manager.executions();
        if executions.get(&self.job_id).is_some_and(|e| e.seq == self.seq) {
            executions.remove(&self.job_id);
        }
    }
}

/// Owner of printers and print jobs.
pub struct PrintManager {
    config: PrinterConfig,
    backend: Box<dyn PrinterBackend>,
    spooler: Arc<dyn PrintSpooler>,
    audit: Arc<AuditLogger>,
    jobs: RwLock<HashMap<JobId, PrintJob>>,
    executions: Mutex<HashMap<JobId, Execution>>,
    next_seq: AtomicU64,
    printers: RwLock<PrinterCache>,
    preferred_printer: RwLock<Option<String>>,
    observers: RwLock<Vec<Arc<dyn ProgressObserver>>>,
}

impl std::fmt::Debug for PrintManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintManager")
            .field("backend", &self.backend.name())
            .field("max_concurrent_jobs", &self.config.max_concurrent_jobs)
            .finish_non_exhaustive()
    }
}

impl PrintManager {
    pub fn new(
        config: PrinterConfig,
        backend: Box<dyn PrinterBackend>,
        spooler: Arc<dyn PrintSpooler>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let preferred = config.default_printer.clone();
        Self {
            config,
            backend,
            spooler,
            audit,
            jobs: RwLock::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            printers: RwLock::new(PrinterCache::default()),
            preferred_printer: RwLock::new(preferred),
            observers: RwLock::new(Vec::new()),
        }
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<JobId, Execution>> {
        // The map stays consistent even if a holder panicked.
        self.executions.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Printers
    // =========================================================================

    /// Detect printers at startup. On failure the printer list stays empty and
    /// queueing reports the printer as unavailable.
    pub async fn initialize(&self) -> Result<()> {
        match self.detect_printers().await {
            Ok(printers) => {
                tracing::info!(
                    "print_manager_initialized: backend={}, printers={}",
                    self.backend.name(),
                    printers.len()
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!("printer_detection_failed: backend={}, error={}", self.backend.name(), e);
                Err(e)
            }
        }
    }

    /// Query the backend, refresh the cache and elect the default printer.
    pub async fn detect_printers(&self) -> Result<Vec<PrinterInfo>> {
        let mut printers = self.backend.list_printers().await?;
        let preferred = self.preferred_printer.read().await.clone();
        let default_printer = elect_default(&printers, preferred.as_deref());
        for printer in &mut printers {
            printer.is_default = Some(&printer.name) == default_printer.as_ref();
        }

        {
            let mut cache = self.printers.write().await;
            let changed = cache.printers != printers;
            cache.printers = printers.clone();
            cache.default_printer = default_printer.clone();
            cache.refreshed_at = Some(Instant::now());
            if !changed {
                return Ok(printers);
            }
        }

        tracing::info!(
            "printers_detected: count={}, default={}",
            printers.len(),
            default_printer.as_deref().unwrap_or("none")
        );
        self.audit
            .record(
                None,
                event_types::PRINTERS_DETECTED,
                serde_json::json!({
                    "count": printers.len(),
                    "defaultPrinter": default_printer,
                    "online": printers.iter().filter(|p| p.status == PrinterState::Online).count(),
                }),
            )
            .await;
        Ok(printers)
    }

    /// Printer snapshot, refreshed when older than the status TTL.
    pub async fn get_printer_status(&self) -> Result<PrinterStatus> {
        let stale = {
            let cache = self.printers.read().await;
            cache
                .refreshed_at
                .map_or(true, |at| at.elapsed() >= self.config.status_ttl)
        };
        if stale {
            self.detect_printers().await?;
        }

        let cache = self.printers.read().await;
        let available = default_info(&cache).is_some_and(|p| p.status.accepts_jobs());
        Ok(PrinterStatus {
            printers: cache.printers.clone(),
            default_printer: cache.default_printer.clone(),
            available,
            checked_at: Utc::now(),
        })
    }

    /// Pin the default printer. The name must be a detected printer.
    pub async fn set_default_printer(&self, name: &str) -> Result<()> {
        validate_non_empty(name, "printer name")?;
        let known = self.printers.read().await.printers.iter().any(|p| p.name == name);
        if !known {
            return Err(Error::not_found(format!("printer {}", name)));
        }
        *self.preferred_printer.write().await = Some(name.to_string());
        let mut cache = self.printers.write().await;
        cache.default_printer = Some(name.to_string());
        for printer in &mut cache.printers {
            printer.is_default = printer.name == name;
        }
        tracing::info!("default_printer_set: printer={}", name);
        Ok(())
    }

    /// Name of the default printer if it accepts new jobs (Online or Busy).
    async fn available_printer(&self) -> Result<String> {
        usable_default(&self.get_printer_status().await?, PrinterState::accepts_jobs)
    }

    /// Name of the default printer if it is Online and can print right now.
    async fn online_printer(&self) -> Result<String> {
        usable_default(&self.get_printer_status().await?, |state| state == PrinterState::Online)
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Validate options and printer availability, then store a Queued job.
    pub async fn queue_print_job(
        &self,
        session_id: &SessionId,
        files: Vec<FileId>,
        options: &PrintOptionsInput,
        pricing: PriceBreakdown,
    ) -> Result<JobId> {
        let options = validate_print_options(options)?;
        if files.is_empty() {
            return Err(Error::validation("a print job needs at least one file"));
        }
        self.available_printer().await?;

        let job = PrintJob {
            id: JobId::new(),
            session_id: session_id.clone(),
            files,
            options,
            pricing,
            status: JobStatus::Queued,
            progress: 0,
            created_at: Utc::now(),
            executed_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            printer: None,
        };
        let id = job.id.clone();
        tracing::info!(
            "print_job_queued: job_id={}, session_id={}, files={}, copies={}",
            id,
            session_id,
            job.files.len(),
            options.copies
        );
        self.jobs.write().await.insert(id.clone(), job);
        Ok(id)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute a queued job.
    ///
    /// Returns `Err` when the job cannot start (unknown, already executing,
    /// ceiling reached, not Queued, printer not Online). Once started, print
    /// failures are reported in the `PrintResult` and on the job itself.
    pub async fn execute_print_job(&self, job_id: &JobId, files_dir: &Path) -> Result<PrintResult> {
        let started = Instant::now();
        let job = self
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;
        self.check_capacity(job_id)?;
        if job.status != JobStatus::Queued {
            return Err(Error::state_transition(format!(
                "job {} is {}, only queued jobs can be executed",
                job_id, job.status
            )));
        }
        let printer = self.online_printer().await?;

        let (slot, token) = self.reserve(job_id)?;
        let moved = self
            .update_job(job_id, |job| {
                if !job.status.can_transition_to(JobStatus::Printing) {
                    return false;
                }
                job.status = JobStatus::Printing;
                job.progress = 0;
                job.executed_at = Some(Utc::now());
                job.printer = Some(printer.clone());
                true
            })
            .await;
        if !moved {
            return Err(Error::state_transition(format!("job {} left the queue", job_id)));
        }
        tracing::info!("print_job_started: job_id={}, printer={}", job_id, printer);
        self.notify(job_id, None).await;

        let (printed, failure) = self
            .print_files(&job, &printer, files_dir, &token, slot.seq)
            .await;

        // A cancelled run may outlive its slot; a retry then owns the job.
        let finished = match failure {
            None => {
                self.update_job(job_id, |job| {
                    if !self.owns(job_id, slot.seq)
                        || !job.status.can_transition_to(JobStatus::Completed)
                    {
                        return false;
                    }
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.completed_at = Some(Utc::now());
                    true
                })
                .await
            }
            Some((_, ref e)) => {
                let message = e.to_string();
                self.update_job(job_id, |job| {
                    if !self.owns(job_id, slot.seq)
                        || !job.status.can_transition_to(JobStatus::Failed)
                    {
                        return false;
                    }
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                    job.completed_at = Some(Utc::now());
                    true
                })
                .await
            }
        };
        drop(slot);
        if finished {
            self.notify(job_id, None).await;
        }

        let current = match self.get_job(job_id).await {
            Some(current) => current,
            // Dropped with its session after a cancel settled it.
            None => PrintJob {
                status: JobStatus::Failed,
                error: Some(CANCELLED_REASON.to_string()),
                ..job
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        match current.status {
            JobStatus::Completed => tracing::info!(
                "print_job_completed: job_id={}, files={}, duration_ms={}",
                job_id,
                printed,
                duration_ms
            ),
            _ => tracing::warn!(
                "print_job_failed: job_id={}, files_printed={}, error={}",
                job_id,
                printed,
                current.error.as_deref().unwrap_or("unknown")
            ),
        }
        Ok(PrintResult {
            job_id: job_id.clone(),
            success: current.status == JobStatus::Completed,
            status: current.status,
            files_printed: printed,
            error: current.error,
            failure_category: failure.filter(|_| finished).map(|(category, _)| category),
            duration_ms,
        })
    }

    /// Print each file in order, stopping at the first failure.
    async fn print_files(
        &self,
        job: &PrintJob,
        printer: &str,
        files_dir: &Path,
        token: &CancellationToken,
        seq: u64,
    ) -> (usize, Option<(ErrorCategory, Error)>) {
        let mut paths = Vec::with_capacity(job.files.len());
        for file_id in &job.files {
            match resolve_file(files_dir, file_id).await {
                Ok(path) => paths.push(path),
                Err(e) => return (0, Some((ErrorCategory::File, e))),
            }
        }

        let total = paths.len();
        for (i, path) in paths.iter().enumerate() {
            if token.is_cancelled() {
                return (i, Some((ErrorCategory::Printer, Error::cancelled(CANCELLED_REASON))));
            }
            if let Err(e) = self
                .spooler
                .print_file(printer, path, &job.options, token)
                .await
            {
                return (i, Some((ErrorCategory::Printer, e)));
            }
            let progress = (((i + 1) * 100) / total).min(99) as u8;
            let advanced = self
                .update_job(&job.id, |job| {
                    if job.status != JobStatus::Printing || !self.owns(&job.id, seq) {
                        return false;
                    }
                    job.progress = progress;
                    true
                })
                .await;
            if advanced {
                self.notify(&job.id, Some(format!("printed {} of {} files", i + 1, total)))
                    .await;
            }
        }
        (total, None)
    }

    fn check_capacity(&self, job_id: &JobId) -> Result<()> {
        let executions = self.executions();
        if executions.contains_key(job_id) {
            return Err(Error::state_transition(format!("job {} is already executing", job_id)));
        }
        if executions.len() >= self.config.max_concurrent_jobs {
            return Err(Error::capacity_exceeded(format!(
                "{} jobs already executing",
                executions.len()
            )));
        }
        Ok(())
    }

    /// Whether execution `seq` still holds the job's slot.
    fn owns(&self, job_id: &JobId, seq: u64) -> bool {
        self.executions().get(job_id).is_some_and(|e| e.seq == seq)
    }

    fn reserve(&self, job_id: &JobId) -> Result<(ExecutionSlot<'_>, CancellationToken)> {
        self.check_capacity(job_id)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.executions().insert(
            job_id.clone(),
            Execution {
                seq,
                token: token.clone(),
            },
        );
        Ok((
            ExecutionSlot {
                manager: self,
                job_id: job_id.clone(),
                seq,
            },
            token,
        ))
    }

    /// Reset a failed job to Queued and execute it again.
    pub async fn retry_print_job(&self, job_id: &JobId, files_dir: &Path) -> Result<PrintResult> {
        let job = self
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;
        if job.status != JobStatus::Failed {
            return Err(Error::state_transition(format!(
                "job {} is {}, only failed jobs can be retried",
                job_id, job.status
            )));
        }
        self.update_job(job_id, |job| {
            if !job.status.can_transition_to(JobStatus::Queued) {
                return false;
            }
            job.status = JobStatus::Queued;
            job.progress = 0;
            job.error = None;
            job.executed_at = None;
            job.completed_at = None;
            job.retry_count += 1;
            true
        })
        .await;
        tracing::info!("print_job_retried: job_id={}, attempt={}", job_id, job.retry_count + 1);
        self.notify(job_id, Some("retrying".to_string())).await;
        self.execute_print_job(job_id, files_dir).await
    }

    /// Cancel a job unless it already completed.
    ///
    /// Best effort: a file already accepted by the OS spooler keeps printing.
    pub async fn cancel_print_job(&self, job_id: &JobId) -> Result<()> {
        let job = self
            .get_job(job_id)
            .await
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;
        if job.status == JobStatus::Completed {
            return Err(Error::state_transition(format!("job {} already completed", job_id)));
        }

        if let Some(execution) = self.executions().remove(job_id) {
            execution.token.cancel();
        }
        let cancelled = self
            .update_job(job_id, |job| {
                if !job.status.can_transition_to(JobStatus::Failed) {
                    return false;
                }
                job.status = JobStatus::Failed;
                job.error = Some(CANCELLED_REASON.to_string());
                job.completed_at = Some(Utc::now());
                true
            })
            .await;
        if cancelled {
            tracing::info!("print_job_cancelled: job_id={}", job_id);
            self.notify(job_id, Some(CANCELLED_REASON.to_string())).await;
        }
        Ok(())
    }

    /// Cancel every unfinished job of a session. Returns the cancelled ids.
    pub async fn cancel_session_jobs(&self, session_id: &SessionId) -> Vec<JobId> {
        let pending: Vec<JobId> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| &j.session_id == session_id && !j.status.is_finished())
            .map(|j| j.id.clone())
            .collect();
        let mut cancelled = Vec::with_capacity(pending.len());
        for id in pending {
            match self.cancel_print_job(&id).await {
                Ok(()) => cancelled.push(id),
                Err(e) => tracing::warn!("session_job_cancel_failed: job_id={}, error={}", id, e),
            }
        }
        cancelled
    }

    /// Drop a session's finished jobs. Returns how many were removed.
    pub async fn cleanup_session_jobs(&self, session_id: &SessionId) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, j| !(&j.session_id == session_id && j.status.is_finished()));
        before - jobs.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_job(&self, job_id: &JobId) -> Option<PrintJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn get_session_jobs(&self, session_id: &SessionId) -> Vec<PrintJob> {
        let mut jobs: Vec<PrintJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| &j.session_id == session_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let mut status = QueueStatus {
            max_concurrent: self.config.max_concurrent_jobs,
            active_executions: self.executions().len(),
            ..Default::default()
        };
        for job in self.jobs.read().await.values() {
            match job.status {
                JobStatus::Queued => status.queued += 1,
                JobStatus::Printing => status.printing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
            }
            status.total += 1;
        }
        status
    }

    /// Responsiveness probe for the integrity monitor.
    pub async fn health_check(&self) -> Result<()> {
        let jobs = self.jobs.read().await.len();
        let active = self.executions().len();
        let printers = self.printers.read().await.printers.len();
        tracing::debug!(
            "print_manager_health: jobs={}, active_executions={}, printers={}",
            jobs,
            active,
            printers
        );
        Ok(())
    }

    // =========================================================================
    // Progress
    // =========================================================================

    pub async fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers.write().await.push(observer);
    }

    async fn update_job<F>(&self, job_id: &JobId, f: F) -> bool
    where
        F: FnOnce(&mut PrintJob) -> bool,
    {
        match self.jobs.write().await.get_mut(job_id) {
            Some(job) => f(job),
            None => false,
        }
    }

    async fn notify(&self, job_id: &JobId, message: Option<String>) {
        let Some(job) = self.get_job(job_id).await else {
            return;
        };
        let progress = JobProgress {
            job_id: job.id,
            session_id: job.session_id,
            status: job.status,
            progress: job.progress,
            message,
            error: job.error,
        };
        let observers = self.observers.read().await.clone();
        for observer in observers {
            let _ = with_recovery(
                || {
                    observer.on_progress(&progress);
                    Ok(())
                },
                "progress_observer",
            );
        }
    }
}

fn elect_default(printers: &[PrinterInfo], preferred: Option<&str>) -> Option<String> {
    if let Some(name) = preferred {
        if printers.iter().any(|p| p.name == name) {
            return Some(name.to_string());
        }
        tracing::warn!("configured_printer_missing: printer={}", name);
    }
    printers
        .iter()
        .find(|p| p.is_default)
        .or_else(|| printers.first())
        .map(|p| p.name.clone())
}

fn default_info(cache: &PrinterCache) -> Option<&PrinterInfo> {
    let name = cache.default_printer.as_ref()?;
    cache.printers.iter().find(|p| &p.name == name)
}

/// Default printer name, if its state passes `accept`.
fn usable_default(status: &PrinterStatus, accept: impl Fn(PrinterState) -> bool) -> Result<String> {
    let name = status
        .default_printer
        .as_ref()
        .ok_or_else(|| Error::unavailable("no printer available"))?;
    match status.printers.iter().find(|p| &p.name == name) {
        Some(p) if accept(p.status) => Ok(name.clone()),
        Some(p) => Err(Error::unavailable(format!("printer {} is {:?}", name, p.status))),
        None => Err(Error::unavailable(format!("printer {} is gone", name))),
    }
}

/// Find `<fileId>` or `<fileId>.<ext>` inside the files directory.
async fn resolve_file(files_dir: &Path, file_id: &FileId) -> Result<PathBuf> {
    let id = file_id.as_str();
    let with_dot = format!("{}.", id);
    let mut entries = tokio::fs::read_dir(files_dir)
        .await
        .map_err(|e| Error::not_found(format!("files directory unreadable: {}", e)))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == id || name.starts_with(&with_dot) {
            return Ok(entry.path());
        }
    }
    Err(Error::not_found(format!("file {}", file_id)))
}
