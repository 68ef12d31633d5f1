//! Session types: SessionStatus, Session, FileMetadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{FileId, SessionId, ShopId};

/// Session lifecycle state.
///
/// State transitions:
/// ```text
/// ACTIVE ⇄ PRINTING → COMPLETED → PRINTING
///    └────────┴──────────┴──────→ TERMINATED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Printing,
    Completed,
    Terminated,
}

impl SessionStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self == SessionStatus::Terminated
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        match (self, to) {
            (SessionStatus::Active, SessionStatus::Printing) => true,
            (SessionStatus::Printing, SessionStatus::Active) => true, // Job failed
            (SessionStatus::Printing, SessionStatus::Completed) => true,
            (SessionStatus::Completed, SessionStatus::Printing) => true, // Another job
            (SessionStatus::Terminated, _) => false,
            (_, SessionStatus::Terminated) => true,
            _ => false,
        }
    }
}

/// Payment state, set by the external payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Why a session was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Explicit,
    Expired,
    FailClosed,
}

/// An uploaded file. Owned by exactly one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: FileId,
    /// Customer-provided name. Never logged or audited.
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// `<files dir>/<id>.<ext>`.
    pub local_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

/// One customer's time-boxed workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub shop_id: ShopId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileMetadata>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn find_file(&self, file_id: &FileId) -> Option<&FileMetadata> {
        self.files.iter().find(|f| &f.id == file_id)
    }

    pub fn total_upload_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Outcome of the startup orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanCleanupReport {
    pub directories_scanned: usize,
    pub removed: usize,
    pub restored: usize,
    pub bytes_reclaimed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_validation() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Printing));
        assert!(SessionStatus::Printing.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Printing.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Completed.can_transition_to(SessionStatus::Printing));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Terminated));
        assert!(SessionStatus::Completed.can_transition_to(SessionStatus::Terminated));

        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Completed));
        assert!(!SessionStatus::Terminated.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Terminated.can_transition_to(SessionStatus::Terminated));
    }

    #[test]
    fn test_session_json_shape() {
        let now = Utc::now();
        let session = Session {
            id: SessionId::must("s1"),
            shop_id: ShopId::from_string("shop".to_string()).unwrap(),
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now,
            files: vec![],
            payment_status: PaymentStatus::Pending,
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["shopId"], "shop");
        assert_eq!(value["status"], "active");
        assert_eq!(value["paymentStatus"], "pending");
        assert!(session.is_expired(now));
    }
}
