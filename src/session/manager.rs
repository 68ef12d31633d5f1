//! Session lifecycle management.
//!
//! Each session owns `<root>/session_<id>/` with a `files/` subdirectory and a
//! `session.json` record. Ids are fixed-width hex, so no session's paths can be
//! a prefix of another's. The active map is the only in-memory source of truth;
//! the on-disk record exists for the startup orphan sweep.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::types::{
    FileMetadata, OrphanCleanupReport, PaymentStatus, Session, SessionStatus, TerminationReason,
};
use crate::audit::{event_types, AuditLogger};
use crate::types::{Error, FileId, Result, SessionId, ShopId, WorkspaceConfig};

const SESSION_DIR_PREFIX: &str = "session_";
const FILES_DIR: &str = "files";
const METADATA_FILE: &str = "session.json";

/// Session manager - owner of every customer workspace.
///
/// One instance per process, shared via `Arc`. The map lock is never held
/// across file system work.
#[derive(Debug)]
pub struct SessionManager {
    config: WorkspaceConfig,
    audit: Arc<AuditLogger>,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionManager {
    /// Create the manager and its workspace root.
    pub async fn new(config: WorkspaceConfig, audit: Arc<AuditLogger>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.root).await?;
        Ok(Self {
            config,
            audit,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.config.root
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        self.config
            .root
            .join(format!("{}{}", SESSION_DIR_PREFIX, id.as_str()))
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a session for the configured shop.
    pub async fn create_session(&self) -> Result<SessionId> {
        let shop_id = ShopId::from_string(self.config.shop_id.clone())
            .map_err(|e| Error::validation(e.to_string()))?;
        self.create_session_for_shop(shop_id).await
    }

    /// Create a session with its isolated workspace.
    pub async fn create_session_for_shop(&self, shop_id: ShopId) -> Result<SessionId> {
        // create_dir (not create_dir_all) fails on an existing directory, so the
        // file system arbitrates uniqueness even across processes.
        let (id, root) = loop {
            let id = SessionId::new();
            let root = self.session_path(&id);
            match tokio::fs::create_dir(&root).await {
                Ok(()) => break (id, root),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            shop_id,
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now + to_chrono(self.config.session_timeout),
            files: Vec::new(),
            payment_status: PaymentStatus::Pending,
        };

        let setup = async {
            tokio::fs::create_dir(root.join(FILES_DIR)).await?;
            write_metadata(&root, &session).await
        };
        if let Err(e) = setup.await {
            let _ = tokio::fs::remove_dir_all(&root).await;
            return Err(e);
        }

        self.sessions.write().await.insert(id.clone(), session.clone());

        tracing::info!("session_created: session_id={}, expires_at={}", id, session.expires_at);
        self.audit
            .record(
                Some(&id),
                event_types::SESSION_CREATED,
                serde_json::json!({
                    "shopId": session.shop_id.as_str(),
                    "expiresAt": session.expires_at,
                }),
            )
            .await;
        Ok(id)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_session_status(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Session root directory, for known sessions only.
    pub async fn get_session_directory(&self, id: &SessionId) -> Option<PathBuf> {
        if self.sessions.read().await.contains_key(id) {
            Some(self.session_path(id))
        } else {
            None
        }
    }

    /// Session upload directory, for known sessions only.
    pub async fn get_session_files_directory(&self, id: &SessionId) -> Option<PathBuf> {
        self.get_session_directory(id).await.map(|p| p.join(FILES_DIR))
    }

    /// Every session currently held in memory.
    pub async fn get_active_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Fetch a session usable for new work: present, not terminated, not expired.
    pub async fn require_usable(&self, id: &SessionId) -> Result<Session> {
        let session = self
            .get_session_status(id)
            .await
            .ok_or_else(|| Error::not_found(format!("session {}", id)))?;
        if session.status.is_terminal() {
            return Err(Error::state_transition(format!("session {} is terminated", id)));
        }
        if session.is_expired(Utc::now()) {
            return Err(Error::state_transition(format!("session {} has expired", id)));
        }
        Ok(session)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Store an upload in the session's files directory.
    ///
    /// The file lands as `<fileId>.<ext>`; the customer's name is kept only in
    /// the session record.
    pub async fn add_file(
        &self,
        id: &SessionId,
        original_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<FileMetadata> {
        let session = self.require_usable(id).await?;
        if session.status != SessionStatus::Active {
            return Err(Error::state_transition(format!(
                "session {} does not accept uploads while {:?}",
                id, session.status
            )));
        }
        let size = bytes.len() as u64;
        if size == 0 {
            return Err(Error::validation("empty upload"));
        }
        if size > self.config.max_file_size_bytes {
            return Err(Error::validation(format!(
                "upload of {} bytes exceeds limit of {} bytes",
                size, self.config.max_file_size_bytes
            )));
        }

        let file_id = FileId::new();
        let file_name = match file_extension(original_name, mime_type) {
            Some(ext) => format!("{}.{}", file_id, ext),
            None => file_id.to_string(),
        };
        let local_path = self.session_path(id).join(FILES_DIR).join(file_name);
        tokio::fs::write(&local_path, bytes).await?;

        let metadata = FileMetadata {
            id: file_id.clone(),
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size,
            uploaded_at: Utc::now(),
            local_path: local_path.clone(),
            page_count: estimate_page_count(bytes, mime_type),
        };

        let updated = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(id) {
                Some(s) if !s.status.is_terminal() => {
                    s.files.push(metadata.clone());
                    Some(s.clone())
                }
                _ => None,
            }
        };
        let Some(updated) = updated else {
            // Terminated while we were writing; don't leave the file behind.
            let _ = tokio::fs::remove_file(&local_path).await;
            return Err(Error::state_transition(format!("session {} is terminated", id)));
        };
        self.persist(&updated).await;

        tracing::debug!("file_uploaded: session_id={}, file_id={}, size={}", id, file_id, size);
        self.audit
            .record(
                Some(id),
                event_types::FILE_UPLOADED,
                serde_json::json!({
                    "fileId": file_id,
                    "mimeType": mime_type,
                    "size": size,
                    "pageCount": metadata.page_count,
                }),
            )
            .await;
        Ok(metadata)
    }

    /// Record a page count determined outside the agent (e.g. by the frontend).
    pub async fn set_file_page_count(
        &self,
        id: &SessionId,
        file_id: &FileId,
        pages: u32,
    ) -> Result<()> {
        self.mutate(id, |session| {
            let file = session
                .files
                .iter_mut()
                .find(|f| &f.id == file_id)
                .ok_or_else(|| Error::not_found(format!("file {} in session {}", file_id, id)))?;
            file.page_count = Some(pages);
            Ok(())
        })
        .await
    }

    /// Move a session along its lifecycle.
    pub async fn update_session_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        if status == SessionStatus::Terminated {
            return Err(Error::validation("use terminate_session to terminate a session"));
        }
        self.mutate(id, |session| {
            if session.status == status {
                return Ok(());
            }
            if !session.status.can_transition_to(status) {
                return Err(Error::state_transition(format!(
                    "cannot move session {} from {:?} to {:?}",
                    id, session.status, status
                )));
            }
            session.status = status;
            Ok(())
        })
        .await
    }

    pub async fn update_payment_status(&self, id: &SessionId, payment: PaymentStatus) -> Result<()> {
        self.mutate(id, |session| {
            session.payment_status = payment;
            Ok(())
        })
        .await?;
        self.audit
            .record(
                Some(id),
                event_types::PAYMENT_UPDATED,
                serde_json::json!({ "paymentStatus": payment }),
            )
            .await;
        Ok(())
    }

    /// Push the expiry out, e.g. while a long job is printing.
    pub async fn extend_session(&self, id: &SessionId, extra: Duration) -> Result<()> {
        self.mutate(id, |session| {
            session.expires_at += to_chrono(extra);
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, id: &SessionId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session) -> Result<()>,
    {
        let updated = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| Error::not_found(format!("session {}", id)))?;
            f(session)?;
            session.clone()
        };
        self.persist(&updated).await;
        Ok(())
    }

    async fn persist(&self, session: &Session) {
        if let Err(e) = write_metadata(&self.session_path(&session.id), session).await {
            tracing::warn!("session_metadata_write_failed: session_id={}, error={}", session.id, e);
        }
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Terminate a session explicitly.
    ///
    /// Idempotent: returns `Ok(false)` if the session was unknown or already gone.
    pub async fn terminate_session(&self, id: &SessionId) -> Result<bool> {
        self.terminate_session_with_reason(id, TerminationReason::Explicit)
            .await
    }

    /// Terminate a session, deleting its workspace.
    ///
    /// Removal from the map happens first and under the write lock, so when
    /// several callers race only one of them deletes and audits.
    pub async fn terminate_session_with_reason(
        &self,
        id: &SessionId,
        reason: TerminationReason,
    ) -> Result<bool> {
        let removed = self.sessions.write().await.remove(id);
        let Some(mut session) = removed else {
            return Ok(false);
        };
        session.status = SessionStatus::Terminated;

        let root = self.session_path(id);
        let bytes = dir_size(&root).await;
        let delete = match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };

        let event_type = match reason {
            TerminationReason::Expired => event_types::SESSION_EXPIRED,
            _ => event_types::SESSION_TERMINATED,
        };
        self.audit
            .record(
                Some(id),
                event_type,
                serde_json::json!({
                    "reason": reason,
                    "fileCount": session.files.len(),
                    "bytesDeleted": bytes,
                    "workspaceDeleted": delete.is_ok(),
                }),
            )
            .await;

        match delete {
            Ok(()) => {
                tracing::info!("session_terminated: session_id={}, reason={:?}", id, reason);
                Ok(true)
            }
            Err(e) => {
                // The orphan sweep removes what is left on the next start.
                tracing::error!("session_workspace_delete_failed: session_id={}, error={}", id, e);
                Err(e.into())
            }
        }
    }

    /// Terminate every expired session that is not mid-print.
    pub async fn cleanup_expired_sessions(&self) -> Result<Vec<SessionId>> {
        let now = Utc::now();
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired(now) && s.status != SessionStatus::Printing)
            .map(|s| s.id.clone())
            .collect();

        let mut terminated = Vec::with_capacity(expired.len());
        for id in expired {
            match self
                .terminate_session_with_reason(&id, TerminationReason::Expired)
                .await
            {
                Ok(true) => terminated.push(id),
                Ok(false) => {}
                Err(e) => tracing::warn!("expired_session_cleanup_failed: session_id={}, error={}", id, e),
            }
        }
        if !terminated.is_empty() {
            tracing::info!("expired_sessions_cleaned: count={}", terminated.len());
        }
        Ok(terminated)
    }

    /// Startup sweep over the workspace root.
    ///
    /// Directories with missing, corrupt or expired metadata are deleted.
    /// Valid unexpired sessions are restored into the active map.
    pub async fn cleanup_orphaned_sessions(&self) -> Result<OrphanCleanupReport> {
        let mut report = OrphanCleanupReport::default();
        let now = Utc::now();
        let mut entries = tokio::fs::read_dir(&self.config.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            report.directories_scanned += 1;

            if let Some(session) = read_metadata(&path).await {
                let dir_matches = name
                    .strip_prefix(SESSION_DIR_PREFIX)
                    .is_some_and(|id| id == session.id.as_str());
                let usable = dir_matches && !session.status.is_terminal() && !session.is_expired(now);
                if usable {
                    let mut session = session;
                    // A print in flight died with the previous process.
                    if session.status == SessionStatus::Printing {
                        session.status = SessionStatus::Active;
                    }
                    let id = session.id.clone();
                    let file_count = session.files.len();
                    let inserted = {
                        let mut sessions = self.sessions.write().await;
                        if sessions.contains_key(&id) {
                            false
                        } else {
                            sessions.insert(id.clone(), session);
                            true
                        }
                    };
                    if inserted {
                        report.restored += 1;
                        self.audit
                            .record(
                                Some(&id),
                                event_types::SESSION_RESTORED,
                                serde_json::json!({ "fileCount": file_count }),
                            )
                            .await;
                    }
                    continue;
                }
            }

            let bytes = dir_size(&path).await;
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes_reclaimed += bytes;
                }
                Err(e) => {
                    tracing::warn!("orphan_remove_failed: dir={}, error={}", name, e);
                }
            }
        }

        tracing::info!(
            "orphaned_sessions_cleaned: scanned={}, removed={}, restored={}, bytes={}",
            report.directories_scanned,
            report.removed,
            report.restored,
            report.bytes_reclaimed
        );
        self.audit
            .record(
                None,
                event_types::ORPHANED_SESSIONS_CLEANED,
                serde_json::json!({
                    "directoriesScanned": report.directories_scanned,
                    "removed": report.removed,
                    "restored": report.restored,
                    "bytesReclaimed": report.bytes_reclaimed,
                }),
            )
            .await;
        Ok(report)
    }

    /// Responsiveness and workspace checks for the integrity monitor.
    pub async fn health_check(&self) -> Result<()> {
        let _count = self.sessions.read().await.len();
        let probe = self.config.root.join(".integrity-probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }
}

async fn write_metadata(root: &Path, session: &Session) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(session)?;
    let tmp = root.join(format!("{}.tmp", METADATA_FILE));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, root.join(METADATA_FILE)).await?;
    Ok(())
}

async fn read_metadata(root: &Path) -> Option<Session> {
    let bytes = tokio::fs::read(root.join(METADATA_FILE)).await.ok()?;
    let session: Session = serde_json::from_slice(&bytes).ok()?;
    // Ids from disk skip constructor validation.
    SessionId::from_string(session.id.to_string()).ok()?;
    Some(session)
}

/// Total bytes under a directory; unreadable entries count as zero.
async fn dir_size(root: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => stack.push(entry.path()),
                Ok(meta) => total += meta.len(),
                Err(_) => {}
            }
        }
    }
    total
}

/// Extension for the stored file: the original's if it is short and
/// alphanumeric, else the first one registered for the MIME type.
fn file_extension(original_name: &str, mime_type: &str) -> Option<String> {
    let from_name = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());
    from_name.or_else(|| {
        mime_guess::get_mime_extensions_str(mime_type)
            .and_then(|exts| exts.first())
            .map(|e| e.to_string())
    })
}

/// Cheap page estimate: counts page objects in PDFs, one page for images.
fn estimate_page_count(bytes: &[u8], mime_type: &str) -> Option<u32> {
    if mime_type.starts_with("image/") {
        return Some(1);
    }
    if mime_type != "application/pdf" {
        return None;
    }
    let mut pages = 0u32;
    for marker in [&b"/Type /Page"[..], &b"/Type/Page"[..]] {
        let mut i = 0;
        while let Some(pos) = find(&bytes[i..], marker) {
            let end = i + pos + marker.len();
            // Skip the "/Pages" tree nodes.
            if bytes.get(end) != Some(&b's') {
                pages += 1;
            }
            i = end;
        }
    }
    (pages > 0).then_some(pages)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventFilter;
    use crate::types::AuditConfig;

    async fn manager(dir: &Path) -> SessionManager {
        let audit = AuditLogger::new(AuditConfig {
            log_dir: dir.join("audit"),
            ..Default::default()
        })
        .await
        .unwrap();
        let config = WorkspaceConfig {
            root: dir.join("sessions"),
            ..Default::default()
        };
        SessionManager::new(config, Arc::new(audit)).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_session_layout() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path()).await;
        let id = sm.create_session().await.unwrap();

        let root = sm.get_session_directory(&id).await.unwrap();
        let files = sm.get_session_files_directory(&id).await.unwrap();
        assert!(root.is_dir());
        assert!(files.is_dir());
        assert!(files.starts_with(&root));
        assert!(root.join("session.json").is_file());

        let session = sm.get_session_status(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.expires_at - session.created_at, ChronoDuration::minutes(30));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path()).await;
        let id = sm.create_session().await.unwrap();
        let root = sm.get_session_directory(&id).await.unwrap();

        assert!(sm.terminate_session(&id).await.unwrap());
        assert!(!root.exists());
        assert!(sm.get_session_status(&id).await.is_none());

        assert!(!sm.terminate_session(&id).await.unwrap());
        assert!(!sm.terminate_session(&SessionId::new()).await.unwrap());

        let events = sm
            .audit
            .read_events(&EventFilter::for_session(&id))
            .await
            .unwrap();
        let terminated = events
            .iter()
            .filter(|e| e.event_type == event_types::SESSION_TERMINATED)
            .count();
        assert_eq!(terminated, 1);
    }

    #[tokio::test]
    async fn test_add_file_stores_under_file_id() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path()).await;
        let id = sm.create_session().await.unwrap();

        let meta = sm
            .add_file(&id, "Tax Return 2025.PDF", "application/pdf", b"%PDF-1.4 /Type /Pages /Type /Page /Type/Page")
            .await
            .unwrap();
        let name = meta.local_path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("{}.pdf", meta.id));
        assert_eq!(meta.page_count, Some(2));
        assert_eq!(sm.get_session_status(&id).await.unwrap().files.len(), 1);

        let raw = std::fs::read_to_string(dir.path().join("audit").join("audit.log")).unwrap();
        assert!(!raw.contains("Tax Return"));
    }

    #[tokio::test]
    async fn test_add_file_limits() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLogger::new(AuditConfig {
            log_dir: dir.path().join("audit"),
            ..Default::default()
        })
        .await
        .unwrap();
        let sm = SessionManager::new(
            WorkspaceConfig {
                root: dir.path().join("sessions"),
                max_file_size_bytes: 4,
                ..Default::default()
            },
            Arc::new(audit),
        )
        .await
        .unwrap();
        let id = sm.create_session().await.unwrap();

        assert!(matches!(sm.add_file(&id, "a.txt", "text/plain", b"12345").await, Err(Error::Validation(_))));
        assert!(matches!(sm.add_file(&id, "a.txt", "text/plain", b"").await, Err(Error::Validation(_))));
        assert!(matches!(
            sm.add_file(&SessionId::new(), "a.txt", "text/plain", b"1").await,
            Err(Error::NotFound(_))
        ));

        let meta = sm.add_file(&id, "noext", "image/png", b"1234").await.unwrap();
        assert_eq!(meta.local_path.extension().unwrap(), "png");
        assert_eq!(meta.page_count, Some(1));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path()).await;
        let id = sm.create_session().await.unwrap();

        assert!(sm.update_session_status(&id, SessionStatus::Completed).await.is_err());
        sm.update_session_status(&id, SessionStatus::Printing).await.unwrap();
        sm.update_session_status(&id, SessionStatus::Completed).await.unwrap();
        assert!(sm.update_session_status(&id, SessionStatus::Terminated).await.is_err());

        sm.update_payment_status(&id, PaymentStatus::Paid).await.unwrap();
        let session = sm.get_session_status(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_expired_sessions_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let sm = manager(dir.path()).await;
        let stale = sm.create_session().await.unwrap();
        let fresh = sm.create_session().await.unwrap();
        let printing = sm.create_session().await.unwrap();
        sm.update_session_status(&printing, SessionStatus::Printing).await.unwrap();
        {
            let mut sessions = sm.sessions.write().await;
            for id in [&stale, &printing] {
                sessions.get_mut(id).unwrap().expires_at = Utc::now() - ChronoDuration::minutes(1);
            }
        }

        assert!(matches!(sm.require_usable(&stale).await, Err(Error::StateTransition(_))));
        let swept = sm.cleanup_expired_sessions().await.unwrap();
        assert_eq!(swept, vec![stale.clone()]);
        assert!(sm.get_session_status(&stale).await.is_none());
        assert!(sm.get_session_status(&fresh).await.is_some());
        assert!(sm.get_session_status(&printing).await.is_some());
    }

    #[tokio::test]
    async fn test_orphan_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sessions");

        // Previous run: one live session, one expired, plus junk.
        let (live, expired) = {
            let sm = manager(dir.path()).await;
            let live = sm.create_session().await.unwrap();
            sm.add_file(&live, "a.pdf", "application/pdf", b"%PDF").await.unwrap();
            let expired = sm.create_session().await.unwrap();
            sm.sessions.write().await.get_mut(&expired).unwrap().expires_at =
                Utc::now() - ChronoDuration::minutes(5);
            let snapshot = sm.get_session_status(&expired).await.unwrap();
            sm.persist(&snapshot).await;
            (live, expired)
        };
        std::fs::create_dir_all(root.join("session_nometadata/files")).unwrap();
        std::fs::write(root.join("session_nometadata/files/x.pdf"), b"12345").unwrap();
        std::fs::create_dir_all(root.join("session_corrupt")).unwrap();
        std::fs::write(root.join("session_corrupt/session.json"), b"{not json").unwrap();
        std::fs::write(root.join("stray.txt"), b"ignored").unwrap();

        let sm = manager(dir.path()).await;
        let report = sm.cleanup_orphaned_sessions().await.unwrap();
        assert_eq!(report.directories_scanned, 4);
        assert_eq!(report.removed, 3);
        assert_eq!(report.restored, 1);
        assert!(report.bytes_reclaimed >= 5);

        assert!(sm.get_session_status(&live).await.is_some());
        assert!(sm.get_session_status(&expired).await.is_none());
        assert!(!root.join("session_nometadata").exists());
        assert!(!root.join("session_corrupt").exists());
        assert!(root.join("stray.txt").exists());
    }

    #[test]
    fn test_page_estimate() {
        assert_eq!(estimate_page_count(b"/Type /Pages /Type /Page /Type /Page", "application/pdf"), Some(2));
        assert_eq!(estimate_page_count(b"%PDF-1.7", "application/pdf"), None);
        assert_eq!(estimate_page_count(b"...", "image/jpeg"), Some(1));
        assert_eq!(estimate_page_count(b"hello", "text/plain"), None);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("report.DOCX", "application/octet-stream").as_deref(), Some("docx"));
        assert!(file_extension("photo", "image/jpeg").is_some());
        assert_eq!(file_extension("weird.ext/../x", "application/x-unknown-kiosk"), None);
    }
}
