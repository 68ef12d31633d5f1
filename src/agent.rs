//! Kiosk agent - process-level owner of the managers.
//!
//! The agent builds one instance of each manager, wires them together and
//! owns the periodic work:
//! - Session expiry sweep (expired sessions and their unfinished jobs)
//! - Audit retention sweep (rotated logs past the retention window)
//! - Network, resource and integrity monitors (owned by the error handler)

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::audit::AuditLogger;
use crate::config_source::ConfigurationSource;
use crate::failsafe::{ErrorHandler, NetworkProbe};
use crate::jobs::PrintJobService;
use crate::printing::{platform_backend, CommandSpooler, PrintManager, PrintSpooler, PrinterBackend};
use crate::session::{OrphanCleanupReport, SessionManager};
use crate::tasks::BackgroundTasks;
use crate::types::{Config, Result};

/// Statistics from one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    pub sessions_expired: usize,
    pub jobs_cancelled: usize,
    pub jobs_removed: usize,
}

/// Owns every manager and background task of a running kiosk.
pub struct KioskAgent {
    config: Config,
    audit: Arc<AuditLogger>,
    sessions: Arc<SessionManager>,
    printing: Arc<PrintManager>,
    jobs: Arc<PrintJobService>,
    errors: Arc<ErrorHandler>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl std::fmt::Debug for KioskAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KioskAgent")
            .field("workspace", &self.config.workspace.root)
            .field("printing", &self.printing)
            .finish_non_exhaustive()
    }
}

impl KioskAgent {
    /// Build an agent that talks to the platform print subsystem.
    pub async fn new(config: Config) -> Result<Self> {
        let backend = platform_backend(config.printer.command_timeout);
        let spooler = Arc::new(
            CommandSpooler::new(config.printer.command_timeout)
                .with_command_override(config.printer.command_override.clone()),
        );
        Self::with_components(config, backend, spooler, None).await
    }

    /// Build an agent from whatever the configuration source currently holds.
    pub async fn from_source(source: &dyn ConfigurationSource) -> Result<Self> {
        let config = source.get_configuration().await?;
        source.validate_configuration(&config).await?;
        Self::new(config).await
    }

    /// Build an agent with explicit printer collaborators.
    ///
    /// Without a probe the error handler probes `monitor.network_probe_url`.
    pub async fn with_components(
        config: Config,
        backend: Box<dyn PrinterBackend>,
        spooler: Arc<dyn PrintSpooler>,
        probe: Option<Arc<dyn NetworkProbe>>,
    ) -> Result<Self> {
        config.validate()?;

        let audit = Arc::new(AuditLogger::new(config.audit.clone()).await?);
        let sessions = Arc::new(SessionManager::new(config.workspace.clone(), audit.clone()).await?);
        let printing = Arc::new(PrintManager::new(
            config.printer.clone(),
            backend,
            spooler,
            audit.clone(),
        ));
        let errors = Arc::new(match probe {
            Some(probe) => ErrorHandler::with_probe(
                config.monitor.clone(),
                sessions.clone(),
                printing.clone(),
                audit.clone(),
                probe,
            ),
            None => ErrorHandler::new(
                config.monitor.clone(),
                sessions.clone(),
                printing.clone(),
                audit.clone(),
            ),
        });
        let jobs = Arc::new(
            PrintJobService::new(
                sessions.clone(),
                printing.clone(),
                audit.clone(),
                errors.clone(),
                config.pricing.clone(),
            )
            .await,
        );
        errors.attach_jobs(&jobs);

        Ok(Self {
            config,
            audit,
            sessions,
            printing,
            jobs,
            errors,
            tasks: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn printing(&self) -> &Arc<PrintManager> {
        &self.printing
    }

    pub fn jobs(&self) -> &Arc<PrintJobService> {
        &self.jobs
    }

    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Recover from the previous run and detect printers.
    ///
    /// A failed orphan sweep is reported to the error handler and startup
    /// continues; printer detection failures leave the printer unavailable.
    pub async fn bootstrap(&self) -> OrphanCleanupReport {
        let report = match self.sessions.cleanup_orphaned_sessions().await {
            Ok(report) => report,
            Err(e) => {
                self.errors.handle(&e).await;
                OrphanCleanupReport::default()
            }
        };
        if let Err(e) = self.printing.initialize().await {
            tracing::warn!("printer_initialization_failed: error={}", e);
        }
        tracing::info!(
            "agent_bootstrapped: restored={}, removed={}, bytes_reclaimed={}",
            report.restored,
            report.removed,
            report.bytes_reclaimed
        );
        report
    }

    /// Start the sweeps and monitors. No-op if already running.
    pub async fn start(&self) {
        let mut slot = self.tasks.lock().await;
        if slot.is_some() {
            return;
        }
        let mut tasks = BackgroundTasks::new();

        let sessions = self.sessions.clone();
        let jobs = self.jobs.clone();
        let errors = self.errors.clone();
        tasks.spawn_periodic(
            "session_expiry_sweep",
            self.config.workspace.expiry_sweep_interval,
            move || {
                let sessions = sessions.clone();
                let jobs = jobs.clone();
                let errors = errors.clone();
                async move {
                    if let Err(e) = sweep_expired(&sessions, &jobs).await {
                        errors.handle(&e).await;
                    }
                    Ok(())
                }
            },
        );

        let audit = self.audit.clone();
        tasks.spawn_periodic("audit_retention_sweep", self.config.audit.sweep_interval, move || {
            let audit = audit.clone();
            async move { audit.cleanup_old_logs().await.map(|_| ()) }
        });

        self.errors.start_monitoring().await;
        tracing::info!("agent_started: tasks={}", tasks.len());
        *slot = Some(tasks);
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// Stop every background task. Sessions stay on disk for the next start.
    pub async fn shutdown(&self) {
        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
        self.errors.stop_monitoring().await;
        tracing::info!("agent_stopped");
    }

    /// Run one expiry sweep now.
    pub async fn sweep_expired_sessions(&self) -> Result<SweepStats> {
        sweep_expired(&self.sessions, &self.jobs).await
    }
}

async fn sweep_expired(sessions: &SessionManager, jobs: &PrintJobService) -> Result<SweepStats> {
    let expired = sessions.cleanup_expired_sessions().await?;
    let mut stats = SweepStats {
        sessions_expired: expired.len(),
        ..Default::default()
    };
    for id in &expired {
        let (cancelled, removed) = jobs.close_session_jobs(id).await;
        stats.jobs_cancelled += cancelled;
        stats.jobs_removed += removed;
    }
    if stats.sessions_expired > 0 {
        tracing::info!(
            "expiry_sweep_completed: sessions={}, jobs_cancelled={}, jobs_removed={}",
            stats.sessions_expired,
            stats.jobs_cancelled,
            stats.jobs_removed
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TransactionOutcome;
    use crate::config_source::MockConfigurationSource;
    use crate::failsafe::NetworkStatus;
    use crate::printing::{PrintOptionsInput, StaticBackend};
    use crate::types::Error;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Debug)]
    struct AlwaysUp;

    #[async_trait]
    impl NetworkProbe for AlwaysUp {
        async fn probe(&self) -> NetworkStatus {
            NetworkStatus::default()
        }
    }

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.workspace.root = dir.join("sessions");
        config.audit.log_dir = dir.join("audit");
        config.printer.command_override = Some(vec!["true".to_string()]);
        config
    }

    async fn agent(config: Config) -> KioskAgent {
        let spooler = Arc::new(
            CommandSpooler::new(Duration::from_secs(5))
                .with_command_override(config.printer.command_override.clone()),
        );
        KioskAgent::with_components(
            config,
            Box::new(StaticBackend::single("Front")),
            spooler,
            Some(Arc::new(AlwaysUp)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.printer.max_concurrent_jobs = 0;
        let result = KioskAgent::with_components(
            config,
            Box::new(StaticBackend::single("Front")),
            Arc::new(CommandSpooler::new(Duration::from_secs(1))),
            Some(Arc::new(AlwaysUp)),
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_from_source_propagates_source_errors() {
        let mut source = MockConfigurationSource::new();
        source
            .expect_get_configuration()
            .returning(|| Err(Error::unavailable("config store offline")));
        assert!(matches!(
            KioskAgent::from_source(&source).await,
            Err(Error::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_restores_previous_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let first = agent(config(dir.path())).await;
            first.sessions().create_session().await.unwrap()
        };

        let second = agent(config(dir.path())).await;
        let report = second.bootstrap().await;
        assert_eq!(report.restored, 1);
        assert!(second.sessions().get_session_status(&id).await.is_some());
        assert!(second.printing().get_printer_status().await.unwrap().available);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(config(dir.path())).await;
        agent.bootstrap().await;
        agent.start().await;
        agent.start().await;
        assert!(agent.is_running().await);
        assert!(agent.errors().is_monitoring().await);

        agent.shutdown().await;
        assert!(!agent.is_running().await);
        assert!(!agent.errors().is_monitoring().await);
    }

    #[tokio::test]
    async fn test_expiry_sweep_cancels_queued_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.workspace.session_timeout = Duration::from_millis(200);
        let agent = agent(config).await;
        agent.bootstrap().await;

        let session = agent.sessions().create_session().await.unwrap();
        let file = agent
            .sessions()
            .add_file(&session, "flyer.pdf", "application/pdf", b"%PDF-1.4")
            .await
            .unwrap();
        agent
            .jobs()
            .create_print_job(&session, vec![file.id], &PrintOptionsInput::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let stats = agent.sweep_expired_sessions().await.unwrap();
        assert_eq!(stats.sessions_expired, 1);
        assert_eq!(stats.jobs_cancelled, 1);
        assert_eq!(stats.jobs_removed, 1);
        assert!(agent.jobs().get_session_jobs(&session).await.is_empty());

        let outcomes: Vec<_> = agent
            .audit()
            .read_transactions()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(outcomes, vec![TransactionOutcome::Created, TransactionOutcome::Failed]);
    }
}
