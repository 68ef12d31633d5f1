//! Error taxonomy and classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ErrorId;

/// What part of the system an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Printer,
    Session,
    File,
    Validation,
    Resource,
    Security,
    System,
    Unknown,
}

/// How bad an error is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// An error recorded by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemError {
    pub id: ErrorId,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

// Checked in order; the first matching row wins.
const CATEGORY_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Security,
        &["unauthorized", "forbidden", "permission denied", "access denied", "tamper", "security", "intrusion"],
    ),
    (
        ErrorCategory::Resource,
        &["out of memory", "no space left", "disk", "memory", "cpu", "quota", "resource", "enospc"],
    ),
    (
        ErrorCategory::Network,
        &["network", "connection", "connect", "dns", "unreachable", "socket", "timed out", "timeout", "http"],
    ),
    (
        ErrorCategory::Printer,
        &["printer", "print job", "spool", "paper", "toner", "jam", "lpstat", "cups"],
    ),
    (ErrorCategory::Session, &["session", "workspace"]),
    (
        ErrorCategory::File,
        &["file", "upload", "no such", "enoent", "pdf", "mime"],
    ),
    (
        ErrorCategory::Validation,
        &["invalid", "validation", "must be", "out of range", "unsupported"],
    ),
    (
        ErrorCategory::System,
        &["panic", "internal", "corrupt", "integrity", "unresponsive"],
    ),
];

const CRITICAL_MARKERS: &[&str] = &[
    "critical",
    "fatal",
    "corrupt",
    "tamper",
    "out of memory",
    "no space left",
    "unresponsive",
];

/// Pattern-match a category from a message.
pub fn classify_category(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Severity for a message in a category.
pub fn classify_severity(category: ErrorCategory, message: &str) -> ErrorSeverity {
    let lower = message.to_ascii_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorSeverity::Critical;
    }
    match category {
        ErrorCategory::Security | ErrorCategory::System => ErrorSeverity::High,
        ErrorCategory::Network
        | ErrorCategory::Printer
        | ErrorCategory::Session
        | ErrorCategory::Resource
        | ErrorCategory::Unknown => ErrorSeverity::Medium,
        ErrorCategory::File | ErrorCategory::Validation => ErrorSeverity::Low,
    }
}

/// Classify a message. Caller-supplied values win over pattern matching.
pub fn classify(
    message: &str,
    category: Option<ErrorCategory>,
    severity: Option<ErrorSeverity>,
) -> (ErrorCategory, ErrorSeverity) {
    let category = category.unwrap_or_else(|| classify_category(message));
    let severity = severity.unwrap_or_else(|| classify_severity(category, message));
    (category, severity)
}

/// Only transient network and resource conditions are worth retrying.
pub fn is_retryable(category: ErrorCategory, severity: ErrorSeverity) -> bool {
    if severity >= ErrorSeverity::High || category == ErrorCategory::Security {
        return false;
    }
    matches!(category, ErrorCategory::Network | ErrorCategory::Resource)
}
