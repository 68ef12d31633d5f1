//! Append-only NDJSON audit log and transaction ledger.
//!
//! Two streams live in the log directory:
//! - `audit.log`: privacy-filtered [`AuditEvent`]s
//! - `transactions.log`: unfiltered [`TransactionRecord`]s
//!
//! The active file of a stream is renamed to `<stream>.<UTC timestamp>.log`
//! once it reaches the configured size. Rotated files past the retention
//! window are removed by [`AuditLogger::cleanup_old_logs`].

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::privacy;
use super::types::{
    event_types, AuditEvent, AuditHealth, AuditStatistics, EventFilter, RetentionStats,
    TransactionRecord, SYSTEM_SCOPE,
};
use crate::types::{AuditConfig, EventId, Result, SessionId};

const AUDIT_STREAM: &str = "audit";
const LEDGER_STREAM: &str = "transactions";

/// Privacy-filtering audit logger.
#[derive(Debug)]
pub struct AuditLogger {
    config: AuditConfig,
    /// Serializes appends and rotation so lines never interleave.
    append_lock: Mutex<()>,
}

/// A log file on disk with the facts the sweeps need.
#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
    active: bool,
}

impl AuditLogger {
    /// Create a logger, creating the log directory if needed.
    pub async fn new(config: AuditConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.log_dir).await?;
        tracing::debug!("audit_logger_ready: dir={}", config.log_dir.display());
        Ok(Self {
            config,
            append_lock: Mutex::new(()),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.config.log_dir
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Append an event for a session, or for [`SYSTEM_SCOPE`] when `session` is None.
    ///
    /// Metadata goes through the privacy filter before it is serialized.
    pub async fn log_event(
        &self,
        session: Option<&SessionId>,
        event_type: &str,
        metadata: serde_json::Value,
    ) -> Result<AuditEvent> {
        let event = AuditEvent {
            id: EventId::new(),
            session_id: session
                .map(|s| s.to_string())
                .unwrap_or_else(|| SYSTEM_SCOPE.to_string()),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            metadata: privacy::sanitize(metadata),
        };
        self.append(AUDIT_STREAM, &event).await?;
        Ok(event)
    }

    /// Append a system-scoped event.
    pub async fn log_system_event(
        &self,
        event_type: &str,
        metadata: serde_json::Value,
    ) -> Result<AuditEvent> {
        self.log_event(None, event_type, metadata).await
    }

    /// Append an event, logging instead of returning a write failure.
    ///
    /// For state transitions that must not be undone because the audit disk is unhappy.
    pub async fn record(
        &self,
        session: Option<&SessionId>,
        event_type: &str,
        metadata: serde_json::Value,
    ) {
        if let Err(e) = self.log_event(session, event_type, metadata).await {
            tracing::error!("audit_write_failed: event_type={}, error={}", event_type, e);
        }
    }

    /// Append a ledger record.
    pub async fn log_transaction(&self, record: &TransactionRecord) -> Result<()> {
        self.append(LEDGER_STREAM, record).await
    }

    async fn append<T: Serialize>(&self, stream: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;

        // Someone may have removed the directory under us.
        tokio::fs::create_dir_all(&self.config.log_dir).await?;

        let active = self.active_path(stream);
        match tokio::fs::metadata(&active).await {
            Ok(meta) if meta.len() >= self.config.max_file_size_bytes => {
                self.rotate(stream, &active).await?;
            }
            _ => {}
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&active)
            .await?;
        // Terminate a partial line left by a crash so this record stays readable.
        if file.metadata().await?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).await?;
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                line.insert(0, b'\n');
            }
        }
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn active_path(&self, stream: &str) -> PathBuf {
        self.config.log_dir.join(format!("{}.log", stream))
    }

    async fn rotate(&self, stream: &str, active: &Path) -> Result<()> {
        // The counter keeps names unique and sortable when the clock is coarse.
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let mut seq = 0u32;
        let target = loop {
            let candidate = self
                .config
                .log_dir
                .join(format!("{}.{}-{:04}.log", stream, stamp, seq));
            if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                break candidate;
            }
            seq += 1;
        };
        tokio::fs::rename(active, &target).await?;
        tracing::info!("audit_log_rotated: stream={}, rotated={}", stream, target.display());
        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read events back, oldest first. Corrupt or partial lines are skipped.
    pub async fn read_events(&self, filter: &EventFilter) -> Result<Vec<AuditEvent>> {
        let (events, _) = self.read_stream::<AuditEvent>(AUDIT_STREAM).await?;
        let mut matched: Vec<AuditEvent> = events.into_iter().filter(|e| filter.matches(e)).collect();
        if let Some(limit) = filter.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        Ok(matched)
    }

    /// Read the whole ledger, oldest first.
    pub async fn read_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let (records, _) = self.read_stream::<TransactionRecord>(LEDGER_STREAM).await?;
        Ok(records)
    }

    async fn read_stream<T: DeserializeOwned>(&self, stream: &str) -> Result<(Vec<T>, usize)> {
        let mut records = Vec::new();
        let mut corrupt = 0;
        for file in self.list_files(stream).await? {
            let bytes = match tokio::fs::read(&file.path).await {
                Ok(b) => b,
                // Rotated or purged between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for line in String::from_utf8_lossy(&bytes).lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<T>(line) {
                    Ok(record) => records.push(record),
                    Err(_) => corrupt += 1,
                }
            }
        }
        if corrupt > 0 {
            tracing::warn!("audit_corrupt_lines_skipped: stream={}, count={}", stream, corrupt);
        }
        Ok((records, corrupt))
    }

    /// Files of a stream, rotated ones in chronological order and the active one last.
    async fn list_files(&self, stream: &str) -> Result<Vec<LogFile>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.config.log_dir).await?;
                return Ok(files);
            }
            Err(e) => return Err(e.into()),
        };

        let active_name = format!("{}.log", stream);
        let rotated_prefix = format!("{}.", stream);
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let active = name == active_name;
            if !active && !(name.starts_with(&rotated_prefix) && name.ends_with(".log")) {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            files.push(LogFile {
                path: entry.path(),
                size: meta.len(),
                modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
                active,
            });
        }
        files.sort_by(|a, b| a.active.cmp(&b.active).then_with(|| a.path.cmp(&b.path)));
        Ok(files)
    }

    async fn all_files(&self) -> Result<Vec<LogFile>> {
        let mut files = self.list_files(AUDIT_STREAM).await?;
        files.extend(self.list_files(LEDGER_STREAM).await?);
        Ok(files)
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Delete rotated files whose modification time is past the retention window.
    ///
    /// Active files are never removed. Per-file failures are logged and skipped.
    pub async fn cleanup_old_logs(&self) -> Result<RetentionStats> {
        let _guard = self.append_lock.lock().await;
        let cutoff = SystemTime::now()
            .checked_sub(self.config.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut stats = RetentionStats::default();
        for file in self.all_files().await? {
            if file.active || file.modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    stats.files_deleted += 1;
                    stats.bytes_freed += file.size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        "audit_log_purge_failed: file={}, error={}",
                        file.path.display(),
                        e
                    );
                }
            }
        }
        drop(_guard);

        if stats.files_deleted > 0 {
            tracing::info!(
                "audit_logs_purged: files={}, bytes={}",
                stats.files_deleted,
                stats.bytes_freed
            );
            self.record(
                None,
                event_types::LOGS_PURGED,
                serde_json::json!({
                    "filesDeleted": stats.files_deleted,
                    "bytesFreed": stats.bytes_freed,
                }),
            )
            .await;
        }
        Ok(stats)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub async fn get_audit_statistics(&self) -> Result<AuditStatistics> {
        let (events, corrupt_events) = self.read_stream::<AuditEvent>(AUDIT_STREAM).await?;
        let (transactions, corrupt_tx) = self.read_stream::<TransactionRecord>(LEDGER_STREAM).await?;
        let files = self.all_files().await?;

        let mut stats = AuditStatistics {
            total_events: events.len(),
            total_transactions: transactions.len(),
            corrupt_lines: corrupt_events + corrupt_tx,
            total_size_bytes: files.iter().map(|f| f.size).sum(),
            file_count: files.len(),
            oldest_file_age_secs: oldest_age(&files).map(|d| d.as_secs()),
            ..Default::default()
        };
        for event in events {
            *stats.events_by_type.entry(event.event_type).or_default() += 1;
        }
        Ok(stats)
    }

    pub async fn perform_health_check(&self) -> AuditHealth {
        let mut issues = Vec::new();

        let log_dir_exists = tokio::fs::try_exists(&self.config.log_dir).await.unwrap_or(false);
        if !log_dir_exists {
            issues.push("log directory missing".to_string());
        }

        let writable = match self.probe_writable().await {
            Ok(()) => true,
            Err(e) => {
                issues.push(format!("log directory not writable: {}", e));
                false
            }
        };

        let files = match self.all_files().await {
            Ok(files) => files,
            Err(e) => {
                issues.push(format!("cannot list log files: {}", e));
                Vec::new()
            }
        };
        let total_size_bytes: u64 = files.iter().map(|f| f.size).sum();
        let oldest = oldest_age(&files);

        let rotated_oldest = oldest_age(&files.iter().filter(|f| !f.active).cloned().collect::<Vec<_>>());
        if let Some(age) = rotated_oldest {
            if age > self.config.retention + self.config.sweep_interval {
                issues.push("rotated logs past retention; sweep not running".to_string());
            }
        }

        AuditHealth {
            healthy: writable,
            log_dir_exists,
            writable,
            total_size_bytes,
            file_count: files.len(),
            oldest_file_age_secs: oldest.map(|d| d.as_secs()),
            issues,
        }
    }

    async fn probe_writable(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config.log_dir).await?;
        let probe = self.config.log_dir.join(".health-probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await
    }
}

fn oldest_age(files: &[LogFile]) -> Option<Duration> {
    let now = SystemTime::now();
    files
        .iter()
        .map(|f| now.duration_since(f.modified).unwrap_or_default())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::TransactionOutcome;
    use crate::types::JobId;
    use serde_json::json;

    fn config(dir: &Path) -> AuditConfig {
        AuditConfig {
            log_dir: dir.join("logs"),
            max_file_size_bytes: 10 * 1024 * 1024,
            retention: Duration::from_secs(7 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }

    fn age_file(path: &Path, age: Duration) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_event_is_filtered_before_storage() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        let session = SessionId::new();

        logger
            .log_event(
                Some(&session),
                event_types::FILE_UPLOADED,
                json!({"originalName": "passport.pdf", "size": 4096}),
            )
            .await
            .unwrap();

        let raw = std::fs::read_to_string(logger.log_dir().join("audit.log")).unwrap();
        assert!(!raw.contains("passport"));

        let events = logger.read_events(&EventFilter::for_session(&session)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata, json!({"size": 4096}));
        assert_eq!(events[0].session_id, session.to_string());
    }

    #[tokio::test]
    async fn test_system_scope() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        let event = logger.log_system_event("BOOT", json!(null)).await.unwrap();
        assert_eq!(event.session_id, SYSTEM_SCOPE);
        assert_eq!(event.metadata, json!({}));
    }

    #[tokio::test]
    async fn test_missing_directory_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        std::fs::remove_dir_all(logger.log_dir()).unwrap();

        logger.log_system_event("AFTER_DELETE", json!({})).await.unwrap();
        assert!(logger.log_dir().join("audit.log").exists());

        std::fs::remove_dir_all(logger.log_dir()).unwrap();
        assert!(logger.read_events(&EventFilter::default()).await.unwrap().is_empty());
        assert!(logger.log_dir().exists());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        logger.log_system_event("FIRST", json!({})).await.unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(logger.log_dir().join("audit.log"))
                .unwrap();
            f.write_all(b"{\"id\": \"trunc\n\xff\xfe garbage\n\n").unwrap();
        }
        logger.log_system_event("SECOND", json!({})).await.unwrap();

        let events = logger.read_events(&EventFilter::default()).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["FIRST", "SECOND"]);

        let stats = logger.get_audit_statistics().await.unwrap();
        assert_eq!(stats.corrupt_lines, 2);
        assert_eq!(stats.events_by_type.get("FIRST"), Some(&1));
    }

    #[tokio::test]
    async fn test_partial_last_line_does_not_swallow_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        logger.log_system_event("FIRST", json!({})).await.unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(logger.log_dir().join("audit.log"))
                .unwrap();
            f.write_all(b"{\"id\":\"trunc").unwrap();
        }
        logger.log_system_event("SECOND", json!({})).await.unwrap();
        logger.log_system_event("THIRD", json!({})).await.unwrap();

        let events = logger.read_events(&EventFilter::default()).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["FIRST", "SECOND", "THIRD"]);
        assert_eq!(logger.get_audit_statistics().await.unwrap().corrupt_lines, 1);
    }

    #[tokio::test]
    async fn test_rotation_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_file_size_bytes = 200;
        let logger = AuditLogger::new(cfg).await.unwrap();

        for i in 0..10 {
            logger.log_system_event("TICK", json!({"n": i})).await.unwrap();
        }

        let files = logger.list_files(AUDIT_STREAM).await.unwrap();
        assert!(files.len() > 1, "expected rotated files");
        assert!(files.last().unwrap().active);

        let events = logger.read_events(&EventFilter::default()).await.unwrap();
        let ns: Vec<i64> = events.iter().map(|e| e.metadata["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        for i in 0..5 {
            logger.log_system_event("TICK", json!({"n": i})).await.unwrap();
        }
        let filter = EventFilter {
            limit: Some(2),
            ..EventFilter::of_type("TICK")
        };
        let events = logger.read_events(&filter).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].metadata["n"], 4);
    }

    #[tokio::test]
    async fn test_retention_removes_only_old_rotated_files() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        logger.log_system_event("LIVE", json!({})).await.unwrap();

        let old = logger.log_dir().join("audit.20200101T000000.000000Z.log");
        let recent = logger.log_dir().join("transactions.20260101T000000.000000Z.log");
        std::fs::write(&old, b"old line\n").unwrap();
        std::fs::write(&recent, b"").unwrap();
        age_file(&old, Duration::from_secs(30 * 24 * 3600));
        age_file(&logger.active_path(AUDIT_STREAM), Duration::from_secs(30 * 24 * 3600));

        let stats = logger.cleanup_old_logs().await.unwrap();
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.bytes_freed, 9);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(logger.active_path(AUDIT_STREAM).exists());
    }

    #[tokio::test]
    async fn test_sweeps_tolerate_empty_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_file_size_bytes = 64;
        let logger = AuditLogger::new(cfg).await.unwrap();

        std::fs::write(logger.active_path(AUDIT_STREAM), b"").unwrap();
        std::fs::write(logger.active_path(LEDGER_STREAM), b"\x00\x01{{{{\n").unwrap();
        std::fs::write(logger.log_dir().join("audit.x.log"), b"not json at all").unwrap();

        for round in 0..5 {
            logger.log_system_event("ROUND", json!({"round": round})).await.unwrap();
            logger.cleanup_old_logs().await.unwrap();
            logger.get_audit_statistics().await.unwrap();
            assert!(logger.perform_health_check().await.healthy);
        }
        assert!(logger.read_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transactions_are_not_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        let record = TransactionRecord {
            session_id: SessionId::new(),
            total_price: 1440,
            total_pages: 8,
            timestamp: Utc::now(),
            job_id: JobId::new(),
            outcome: TransactionOutcome::Created,
        };
        logger.log_transaction(&record).await.unwrap();

        let raw = std::fs::read_to_string(logger.log_dir().join("transactions.log")).unwrap();
        assert!(raw.contains("\"totalPrice\":1440"));
        assert!(raw.contains("\"totalPages\":8"));
        assert_eq!(logger.read_transactions().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_health_check_reports_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config(dir.path())).await.unwrap();
        logger.log_system_event("ONE", json!({})).await.unwrap();

        let health = logger.perform_health_check().await;
        assert!(health.healthy);
        assert!(health.log_dir_exists);
        assert_eq!(health.file_count, 1);
        assert!(health.total_size_bytes > 0);
        assert!(health.issues.is_empty());
    }
}
