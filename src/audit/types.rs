//! Audit record shapes and event type names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{EventId, JobId, SessionId};

/// Pseudo-session for events that belong to no customer.
pub const SYSTEM_SCOPE: &str = "system";

/// Canonical event type names.
pub mod event_types {
    pub const SESSION_CREATED: &str = "SESSION_CREATED";
    pub const SESSION_RESTORED: &str = "SESSION_RESTORED";
    pub const SESSION_TERMINATED: &str = "SESSION_TERMINATED";
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    pub const FILE_UPLOADED: &str = "FILE_UPLOADED";
    pub const PAYMENT_UPDATED: &str = "PAYMENT_UPDATED";
    pub const ORPHANED_SESSIONS_CLEANED: &str = "ORPHANED_SESSIONS_CLEANED";
    pub const PRINTERS_DETECTED: &str = "PRINTERS_DETECTED";
    pub const JOB_CREATED: &str = "JOB_CREATED";
    pub const JOB_STARTED: &str = "JOB_STARTED";
    pub const JOB_COMPLETED: &str = "JOB_COMPLETED";
    pub const JOB_FAILED: &str = "JOB_FAILED";
    pub const JOB_RETRIED: &str = "JOB_RETRIED";
    pub const JOB_CANCELLED: &str = "JOB_CANCELLED";
    pub const ERROR_OCCURRED: &str = "ERROR_OCCURRED";
    pub const ERROR_RETRY: &str = "ERROR_RETRY";
    pub const ERROR_RESOLVED: &str = "ERROR_RESOLVED";
    pub const FAIL_CLOSED: &str = "FAIL_CLOSED";
    pub const LOGS_PURGED: &str = "LOGS_PURGED";
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: EventId,
    /// A session id or [`SYSTEM_SCOPE`].
    pub session_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// Already privacy-filtered.
    pub metadata: serde_json::Value,
}

/// Reconciliation point of a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionOutcome {
    Created,
    Completed,
    Failed,
}

/// One line of the transaction ledger. Financial data, not filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub session_id: SessionId,
    pub total_price: u64,
    pub total_pages: u32,
    pub timestamp: DateTime<Utc>,
    pub job_id: JobId,
    pub outcome: TransactionOutcome,
}

/// Selection when reading history back.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_session(session_id: &SessionId) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        }
    }

    pub fn of_type(event_type: &str) -> Self {
        Self {
            event_type: Some(event_type.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(session) = &self.session_id {
            if &event.session_id != session {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Counts and sizes for operational monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub total_transactions: usize,
    pub corrupt_lines: usize,
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub oldest_file_age_secs: Option<u64>,
}

/// Result of [`super::AuditLogger::perform_health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditHealth {
    pub healthy: bool,
    pub log_dir_exists: bool,
    pub writable: bool,
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub oldest_file_age_secs: Option<u64>,
    pub issues: Vec<String>,
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionStats {
    pub files_deleted: usize,
    pub bytes_freed: u64,
}
