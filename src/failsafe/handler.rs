//! Error handler - classification, history, monitors and fail-closed recovery.
//!
//! Fail-closed mode: a critical or security error terminates every active
//! session before `handle_error` returns. A kiosk in an unknown state must not
//! hand one customer's documents to the next.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};

use super::classify::{classify, is_retryable, ErrorCategory, ErrorSeverity, SystemError};
use super::monitor::{
    assess_resources, HttpProbe, NetworkProbe, NetworkStatus, ResourceCondition, ResourceSampler,
    ResourceSnapshot,
};
use crate::audit::{event_types, AuditLogger};
use crate::jobs::PrintJobService;
use crate::printing::PrintManager;
use crate::session::{SessionManager, TerminationReason};
use crate::tasks::BackgroundTasks;
use crate::types::{Error, ErrorId, MonitorConfig, Result, SessionId};

/// Capacity of the handler event channel. Slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A session the fail-closed sweep could not terminate cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFailure {
    pub session_id: SessionId,
    pub error: String,
}

/// Outcome of a fail-closed sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailClosedReport {
    pub trigger_error: ErrorId,
    pub sessions_terminated: Vec<SessionId>,
    pub failures: Vec<SessionFailure>,
    pub jobs_cancelled: usize,
}

/// Events broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerEvent {
    ErrorOccurred { error: SystemError },
    ErrorResolved { error_id: ErrorId },
    FailClosed { report: FailClosedReport },
    NetworkChanged { status: NetworkStatus },
}

/// Answer to `get_system_status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub network: NetworkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSnapshot>,
    pub unresolved_errors: Vec<SystemError>,
    pub active_sessions: usize,
    pub fail_closed_enabled: bool,
    pub is_healthy: bool,
}

/// Which components answered the integrity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub session_manager: bool,
    pub print_manager: bool,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.session_manager && self.print_manager
    }
}

/// The fail-safe error handler.
pub struct ErrorHandler {
    config: MonitorConfig,
    fail_closed: AtomicBool,
    sessions: Arc<SessionManager>,
    printing: Arc<PrintManager>,
    /// Weak: the job service reports its failures back to this handler.
    jobs: OnceLock<Weak<PrintJobService>>,
    audit: Arc<AuditLogger>,
    history: RwLock<VecDeque<SystemError>>,
    network: RwLock<NetworkStatus>,
    resources: RwLock<Option<ResourceSnapshot>>,
    /// Error raised for each currently breached resource threshold.
    breaches: Mutex<HashMap<ResourceCondition, ErrorId>>,
    probe: Arc<dyn NetworkProbe>,
    sampler: Arc<StdMutex<ResourceSampler>>,
    events: broadcast::Sender<HandlerEvent>,
    /// Serializes fail-closed sweeps.
    sweep_lock: Mutex<()>,
    monitors: Mutex<Option<BackgroundTasks>>,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("fail_closed", &self.fail_closed.load(Ordering::Relaxed))
            .field("max_error_history", &self.config.max_error_history)
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    pub fn new(
        config: MonitorConfig,
        sessions: Arc<SessionManager>,
        printing: Arc<PrintManager>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let probe = Arc::new(HttpProbe::from_config(&config));
        Self::with_probe(config, sessions, printing, audit, probe)
    }

    /// Construct with a custom network probe.
    pub fn with_probe(
        config: MonitorConfig,
        sessions: Arc<SessionManager>,
        printing: Arc<PrintManager>,
        audit: Arc<AuditLogger>,
        probe: Arc<dyn NetworkProbe>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sampler = ResourceSampler::new(sessions.workspace_root());
        Self {
            fail_closed: AtomicBool::new(config.fail_closed),
            config,
            sessions,
            printing,
            jobs: OnceLock::new(),
            audit,
            history: RwLock::new(VecDeque::new()),
            network: RwLock::new(NetworkStatus::default()),
            resources: RwLock::new(None),
            breaches: Mutex::new(HashMap::new()),
            probe,
            sampler: Arc::new(StdMutex::new(sampler)),
            events,
            sweep_lock: Mutex::new(()),
            monitors: Mutex::new(None),
        }
    }

    /// Route fail-closed job cancellation through the job service so every
    /// cancelled job gets its closing ledger record. Only the first call wins.
    pub fn attach_jobs(&self, jobs: &Arc<PrintJobService>) {
        if self.jobs.set(Arc::downgrade(jobs)).is_err() {
            tracing::warn!("job_service_already_attached");
        }
    }

    /// Cancel a session's unfinished jobs and drop the rest. Returns the cancel count.
    async fn close_session_jobs(&self, session_id: &SessionId) -> usize {
        match self.jobs.get().and_then(Weak::upgrade) {
            Some(jobs) => jobs.close_session_jobs(session_id).await.0,
            None => {
                let cancelled = self.printing.cancel_session_jobs(session_id).await.len();
                self.printing.cleanup_session_jobs(session_id).await;
                cancelled
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HandlerEvent> {
        self.events.subscribe()
    }

    pub fn set_fail_closed(&self, enabled: bool) {
        self.fail_closed.store(enabled, Ordering::SeqCst);
        tracing::info!("fail_closed_mode_set: enabled={}", enabled);
    }

    pub fn is_fail_closed(&self) -> bool {
        self.fail_closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: HandlerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Handling
    // =========================================================================

    /// Record, audit and react to an error.
    ///
    /// With fail-closed enabled, a critical or security error terminates every
    /// active session before this returns.
    pub async fn handle_error(
        &self,
        category: Option<ErrorCategory>,
        severity: Option<ErrorSeverity>,
        message: &str,
    ) -> SystemError {
        let (category, severity) = classify(message, category, severity);
        let error = SystemError {
            id: ErrorId::new(),
            category,
            severity,
            message: message.to_string(),
            timestamp: Utc::now(),
            retryable: is_retryable(category, severity),
            resolved: false,
            resolved_at: None,
        };

        {
            let mut history = self.history.write().await;
            history.push_back(error.clone());
            while history.len() > self.config.max_error_history {
                history.pop_front();
            }
        }

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => tracing::error!(
                "error_recorded: error_id={}, category={:?}, severity={:?}, message={}",
                error.id, category, severity, message
            ),
            _ => tracing::warn!(
                "error_recorded: error_id={}, category={:?}, severity={:?}, message={}",
                error.id, category, severity, message
            ),
        }
        self.audit
            .record(
                None,
                event_types::ERROR_OCCURRED,
                serde_json::json!({
                    "errorId": error.id,
                    "category": category,
                    "severity": severity,
                    "retryable": error.retryable,
                    "message": message,
                }),
            )
            .await;
        self.emit(HandlerEvent::ErrorOccurred {
            error: error.clone(),
        });

        let triggers = severity == ErrorSeverity::Critical || category == ErrorCategory::Security;
        if triggers && self.is_fail_closed() {
            self.fail_closed_recovery(&error).await;
        }
        error
    }

    /// Handle a crate error, using its own category.
    pub async fn handle(&self, error: &Error) -> SystemError {
        self.handle_error(Some(error.category()), None, &error.to_string())
            .await
    }

    /// Terminate every active session exactly once.
    pub async fn fail_closed_recovery(&self, trigger: &SystemError) -> FailClosedReport {
        let _sweep = self.sweep_lock.lock().await;
        tracing::error!(
            "fail_closed_triggered: error_id={}, category={:?}, severity={:?}",
            trigger.id,
            trigger.category,
            trigger.severity
        );

        let mut report = FailClosedReport {
            trigger_error: trigger.id.clone(),
            sessions_terminated: Vec::new(),
            failures: Vec::new(),
            jobs_cancelled: 0,
        };
        for session in self.sessions.get_active_sessions().await {
            let id = session.id;
            // Stop printing before the session's files are wiped.
            report.jobs_cancelled += self.close_session_jobs(&id).await;
            match self
                .sessions
                .terminate_session_with_reason(&id, TerminationReason::FailClosed)
                .await
            {
                Ok(true) => report.sessions_terminated.push(id.clone()),
                // Already terminated by someone else.
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("fail_closed_session_error: session_id={}, error={}", id, e);
                    report.failures.push(SessionFailure {
                        session_id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::error!(
            "fail_closed_completed: terminated={}, failures={}, jobs_cancelled={}",
            report.sessions_terminated.len(),
            report.failures.len(),
            report.jobs_cancelled
        );
        self.audit
            .record(
                None,
                event_types::FAIL_CLOSED,
                serde_json::json!({
                    "triggerErrorId": trigger.id,
                    "category": trigger.category,
                    "severity": trigger.severity,
                    "sessionsTerminated": report.sessions_terminated,
                    "failures": report.failures,
                    "jobsCancelled": report.jobs_cancelled,
                }),
            )
            .await;
        self.emit(HandlerEvent::FailClosed {
            report: report.clone(),
        });
        report
    }

    /// Run an operation, retrying retryable failures with linear backoff.
    ///
    /// The final failure is handed to `handle_error` and returned.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let message = format!("{} failed: {}", operation_name, err);
            let (category, severity) = classify(&message, Some(err.category()), None);
            if !is_retryable(category, severity) || attempt >= max_attempts {
                self.handle_error(Some(category), Some(severity), &message)
                    .await;
                return Err(err);
            }

            let delay = self.config.retry_base_delay * attempt;
            tracing::warn!(
                "operation_retry: operation={}, attempt={}, delay_ms={}, error={}",
                operation_name,
                attempt,
                delay.as_millis(),
                err
            );
            self.audit
                .record(
                    None,
                    event_types::ERROR_RETRY,
                    serde_json::json!({
                        "operation": operation_name,
                        "attempt": attempt,
                        "category": category,
                        "delayMs": delay.as_millis() as u64,
                    }),
                )
                .await;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Mark an error resolved. Returns false for unknown or already resolved ids.
    pub async fn resolve_error(&self, error_id: &ErrorId) -> bool {
        let resolved = {
            let mut history = self.history.write().await;
            match history.iter_mut().find(|e| &e.id == error_id) {
                Some(error) if !error.resolved => {
                    error.resolved = true;
                    error.resolved_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };
        if resolved {
            tracing::info!("error_resolved: error_id={}", error_id);
            self.audit
                .record(
                    None,
                    event_types::ERROR_RESOLVED,
                    serde_json::json!({ "errorId": error_id }),
                )
                .await;
            self.emit(HandlerEvent::ErrorResolved {
                error_id: error_id.clone(),
            });
        }
        resolved
    }

    /// Drop resolved errors from history. Returns how many were dropped.
    pub async fn clear_resolved_errors(&self) -> usize {
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|e| !e.resolved);
        before - history.len()
    }

    pub async fn get_error_history(&self) -> Vec<SystemError> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn unresolved_errors(&self) -> Vec<SystemError> {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| !e.resolved)
            .cloned()
            .collect()
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let unresolved_errors = self.unresolved_errors().await;
        let is_healthy = !unresolved_errors
            .iter()
            .any(|e| e.severity >= ErrorSeverity::High);
        SystemStatus {
            network: self.network.read().await.clone(),
            resources: self.resources.read().await.clone(),
            unresolved_errors,
            active_sessions: self.sessions.session_count().await,
            fail_closed_enabled: self.is_fail_closed(),
            is_healthy,
        }
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    /// Probe the network; a connected-to-disconnected edge raises an error.
    pub async fn check_network(&self) -> NetworkStatus {
        let status = self.probe.probe().await;
        let previous = {
            let mut current = self.network.write().await;
            std::mem::replace(&mut *current, status.clone())
        };

        if previous.connected != status.connected {
            self.emit(HandlerEvent::NetworkChanged {
                status: status.clone(),
            });
            if status.connected {
                tracing::info!("network_restored: latency_ms={:?}", status.latency_ms);
            } else {
                let reason = status.error.as_deref().unwrap_or("no response");
                self.handle_error(
                    Some(ErrorCategory::Network),
                    Some(ErrorSeverity::Medium),
                    &format!("network connectivity lost: {}", reason),
                )
                .await;
            }
        }
        status
    }

    /// Sample host resources and raise errors for breached thresholds.
    pub async fn check_resources(&self) -> Result<ResourceSnapshot> {
        let sampler = self.sampler.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            let mut sampler = sampler.lock().unwrap_or_else(|e| e.into_inner());
            sampler.sample()
        })
        .await
        .map_err(|e| Error::internal(format!("resource sampler failed: {}", e)))?;

        *self.resources.write().await = Some(snapshot.clone());
        tracing::debug!(
            "resources_sampled: memory_percent={:.1}, rss_bytes={}, disk_free_bytes={:?}, cpu_percent={:.1}",
            snapshot.memory_percent,
            snapshot.process_rss_bytes,
            snapshot.disk_free_bytes,
            snapshot.cpu_percent
        );
        self.report_resources(&snapshot).await;
        Ok(snapshot)
    }

    /// Raise one error per breached threshold. A breach already reported and
    /// still unresolved is not reported again; a cleared breach is forgotten.
    async fn report_resources(&self, snapshot: &ResourceSnapshot) {
        let findings = assess_resources(snapshot, &self.config);
        let mut breaches = self.breaches.lock().await;
        breaches.retain(|condition, _| findings.iter().any(|f| f.condition == *condition));

        for finding in findings {
            if let Some(id) = breaches.get(&finding.condition) {
                let open = self
                    .history
                    .read()
                    .await
                    .iter()
                    .any(|e| &e.id == id && !e.resolved);
                if open {
                    tracing::debug!("resource_breach_ongoing: condition={:?}", finding.condition);
                    continue;
                }
            }
            let error = self
                .handle_error(Some(ErrorCategory::Resource), Some(finding.severity), &finding.message)
                .await;
            breaches.insert(finding.condition, error.id);
        }
    }

    /// Both managers must answer within the integrity deadline.
    pub async fn perform_integrity_checks(&self) -> IntegrityReport {
        let deadline = self.config.integrity_check_timeout;
        let session_manager = matches!(
            tokio::time::timeout(deadline, self.sessions.health_check()).await,
            Ok(Ok(()))
        );
        let print_manager = matches!(
            tokio::time::timeout(deadline, self.printing.health_check()).await,
            Ok(Ok(()))
        );
        let report = IntegrityReport {
            session_manager,
            print_manager,
        };

        if !report.session_manager {
            self.handle_error(
                Some(ErrorCategory::Session),
                Some(ErrorSeverity::Critical),
                "integrity check failed: session manager unresponsive",
            )
            .await;
        }
        if !report.print_manager {
            self.handle_error(
                Some(ErrorCategory::Session),
                Some(ErrorSeverity::Critical),
                "integrity check failed: print manager unresponsive",
            )
            .await;
        }
        report
    }

    /// Start the network, resource and integrity monitors. No-op if running.
    pub async fn start_monitoring(self: &Arc<Self>) {
        let mut monitors = self.monitors.lock().await;
        if monitors.is_some() {
            return;
        }
        let mut tasks = BackgroundTasks::new();

        let handler = Arc::clone(self);
        tasks.spawn_periodic("network_monitor", self.config.network_check_interval, move || {
            let handler = handler.clone();
            async move {
                handler.check_network().await;
                Ok(())
            }
        });

        let handler = Arc::clone(self);
        tasks.spawn_periodic("resource_monitor", self.config.resource_check_interval, move || {
            let handler = handler.clone();
            async move { handler.check_resources().await.map(|_| ()) }
        });

        let handler = Arc::clone(self);
        tasks.spawn_periodic("integrity_monitor", self.config.integrity_check_interval, move || {
            let handler = handler.clone();
            async move {
                handler.perform_integrity_checks().await;
                Ok(())
            }
        });

        tracing::info!("monitoring_started: tasks={}", tasks.len());
        *monitors = Some(tasks);
    }

    /// Stop the monitors and wait for them to exit.
    pub async fn stop_monitoring(&self) {
        let tasks = self.monitors.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
            tracing::info!("monitoring_stopped");
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitors.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failsafe::monitor::MockNetworkProbe;
    use crate::printing::{CommandSpooler, StaticBackend};
    use crate::types::{AuditConfig, PrinterConfig, WorkspaceConfig};
    use std::path::Path;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Fixture {
        handler: Arc<ErrorHandler>,
        sessions: Arc<SessionManager>,
        _dir: tempfile::TempDir,
    }

    async fn fixture_with(config: MonitorConfig, probe: Arc<dyn NetworkProbe>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(
            AuditLogger::new(AuditConfig {
                log_dir: dir.path().join("audit"),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let sessions = Arc::new(
            SessionManager::new(
                WorkspaceConfig {
                    root: dir.path().join("sessions"),
                    ..Default::default()
                },
                audit.clone(),
            )
            .await
            .unwrap(),
        );
        let printing = Arc::new(PrintManager::new(
            PrinterConfig::default(),
            Box::new(StaticBackend::single("P")),
            Arc::new(CommandSpooler::new(Duration::from_secs(5))),
            audit.clone(),
        ));
        let handler = Arc::new(ErrorHandler::with_probe(
            config,
            sessions.clone(),
            printing,
            audit,
            probe,
        ));
        Fixture {
            handler,
            sessions,
            _dir: dir,
        }
    }

    fn connected_probe() -> Arc<dyn NetworkProbe> {
        let mut probe = MockNetworkProbe::new();
        probe.expect_probe().returning(NetworkStatus::default);
        Arc::new(probe)
    }

    async fn fixture() -> Fixture {
        fixture_with(MonitorConfig::default(), connected_probe()).await
    }

    fn fast_retry() -> MonitorConfig {
        MonitorConfig {
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_critical_error_fails_closed() {
        let fx = fixture().await;
        let mut events = fx.handler.subscribe();
        let a = fx.sessions.create_session().await.unwrap();
        let b = fx.sessions.create_session().await.unwrap();
        let dir_a = fx.sessions.get_session_directory(&a).await.unwrap();

        let error = fx
            .handler
            .handle_error(Some(ErrorCategory::System), Some(ErrorSeverity::Critical), "state corrupt")
            .await;
        assert_eq!(error.severity, ErrorSeverity::Critical);
        assert!(!error.retryable);

        assert_eq!(fx.sessions.session_count().await, 0);
        assert!(!dir_a.exists());
        assert!(fx.sessions.get_session_status(&b).await.is_none());

        let mut report = None;
        while let Ok(event) = events.try_recv() {
            if let HandlerEvent::FailClosed { report: r } = event {
                report = Some(r);
            }
        }
        let report = report.unwrap();
        assert_eq!(report.sessions_terminated.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.trigger_error, error.id);
    }

    #[tokio::test]
    async fn test_security_error_fails_closed() {
        let fx = fixture().await;
        fx.sessions.create_session().await.unwrap();
        fx.handler
            .handle_error(None, None, "permission denied writing workspace")
            .await;
        assert_eq!(fx.sessions.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_critical_error_keeps_sessions() {
        let fx = fixture().await;
        fx.sessions.create_session().await.unwrap();
        let error = fx
            .handler
            .handle_error(None, None, "printer Office is offline")
            .await;
        assert_eq!(error.category, ErrorCategory::Printer);
        assert_eq!(fx.sessions.session_count().await, 1);
        assert_eq!(fx.handler.get_error_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_disabled() {
        let fx = fixture().await;
        fx.handler.set_fail_closed(false);
        fx.sessions.create_session().await.unwrap();
        fx.handler
            .handle_error(Some(ErrorCategory::System), Some(ErrorSeverity::Critical), "fatal")
            .await;
        assert_eq!(fx.sessions.session_count().await, 1);
        assert!(!fx.handler.get_system_status().await.is_healthy);
    }

    #[tokio::test]
    async fn test_resolve_and_history_cap() {
        let config = MonitorConfig {
            max_error_history: 3,
            ..Default::default()
        };
        let fx = fixture_with(config, connected_probe()).await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(fx.handler.handle_error(None, None, &format!("printer hiccup {i}")).await.id);
        }
        let history = fx.handler.get_error_history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, ids[2]);

        assert!(!fx.handler.resolve_error(&ids[0]).await);
        assert!(fx.handler.resolve_error(&ids[4]).await);
        assert!(!fx.handler.resolve_error(&ids[4]).await);
        assert_eq!(fx.handler.unresolved_errors().await.len(), 2);
        assert_eq!(fx.handler.clear_resolved_errors().await, 1);
        assert_eq!(fx.handler.get_error_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let fx = fixture_with(fast_retry(), connected_probe()).await;
        let calls = &AtomicU32::new(0);
        let value = fx
            .handler
            .execute_with_retry("upload_receipt", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::timeout("gateway did not answer"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(fx.handler.get_error_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let fx = fixture_with(fast_retry(), connected_probe()).await;
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fx
            .handler
            .execute_with_retry("probe", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::timeout("still down"))
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fx.handler.get_error_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_once() {
        let fx = fixture_with(fast_retry(), connected_probe()).await;
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fx
            .handler
            .execute_with_retry("print", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("copies must be between 1 and 10"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_edge_raises_once() {
        let mut probe = MockNetworkProbe::new();
        let mut seq = mockall::Sequence::new();
        for connected in [false, false, true] {
            probe
                .expect_probe()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move || NetworkStatus {
                    connected,
                    error: (!connected).then(|| "network probe timed out".to_string()),
                    ..Default::default()
                });
        }
        let fx = fixture_with(MonitorConfig::default(), Arc::new(probe)).await;

        assert!(!fx.handler.check_network().await.connected);
        assert!(!fx.handler.check_network().await.connected);
        assert!(fx.handler.check_network().await.connected);

        let history = fx.handler.get_error_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].category, ErrorCategory::Network);
        assert!(fx.handler.get_system_status().await.network.connected);
    }

    #[tokio::test]
    async fn test_ongoing_resource_breach_reported_once() {
        let fx = fixture().await;
        let hot = ResourceSnapshot {
            memory_percent: 95.0,
            ..Default::default()
        };
        let cool = ResourceSnapshot {
            memory_percent: 10.0,
            ..Default::default()
        };

        for _ in 0..5 {
            fx.handler.report_resources(&hot).await;
        }
        let history = fx.handler.get_error_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].category, ErrorCategory::Resource);

        // Resolving the error lets a still-ongoing breach be raised again.
        assert!(fx.handler.resolve_error(&history[0].id).await);
        fx.handler.report_resources(&hot).await;
        assert_eq!(fx.handler.get_error_history().await.len(), 2);

        // Clearing and re-entering the breach is a new occurrence.
        fx.handler.report_resources(&cool).await;
        fx.handler.report_resources(&hot).await;
        fx.handler.report_resources(&hot).await;
        assert_eq!(fx.handler.get_error_history().await.len(), 3);
        assert_eq!(fx.handler.unresolved_errors().await.len(), 2);
    }

    #[tokio::test]
    async fn test_integrity_checks_pass() {
        let fx = fixture().await;
        let report = fx.handler.perform_integrity_checks().await;
        assert!(report.is_ok());
        assert!(fx.handler.get_error_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_integrity_failure_fails_closed() {
        let fx = fixture().await;
        fx.sessions.create_session().await.unwrap();
        // An unwritable workspace fails the session manager probe.
        let root = fx.sessions.workspace_root().to_path_buf();
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"not a directory").unwrap();

        let report = fx.handler.perform_integrity_checks().await;
        assert!(!report.session_manager);
        assert!(report.print_manager);
        assert_eq!(fx.sessions.session_count().await, 0);
        assert!(Path::new(&root).is_file());
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle() {
        let fx = fixture().await;
        fx.handler.start_monitoring().await;
        fx.handler.start_monitoring().await;
        assert!(fx.handler.is_monitoring().await);
        fx.handler.stop_monitoring().await;
        assert!(!fx.handler.is_monitoring().await);
    }
}
