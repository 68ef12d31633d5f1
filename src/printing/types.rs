//! Print job and printer types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::failsafe::ErrorCategory;
use crate::types::{Error, FileId, JobId, Result, SessionId};

// =============================================================================
// Job status
// =============================================================================

/// Print job status.
///
/// State transitions:
/// ```text
/// QUEUED → PRINTING → COMPLETED
///    │         │
///    └─────────┴────→ FAILED → QUEUED (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Printing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Check if transition is valid.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        match (self, to) {
            (JobStatus::Queued, JobStatus::Printing) => true,
            (JobStatus::Queued, JobStatus::Failed) => true, // Cancelled before start
            (JobStatus::Printing, JobStatus::Completed) => true,
            (JobStatus::Printing, JobStatus::Failed) => true,
            (JobStatus::Failed, JobStatus::Queued) => true, // Retry
            _ => false,
        }
    }

    /// Completed and Failed jobs are finished unless explicitly retried.
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Printing => "printing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Color,
    Bw,
}

impl FromStr for ColorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "color" => Ok(ColorMode::Color),
            "bw" => Ok(ColorMode::Bw),
            _ => Err(Error::validation(format!(
                "colorMode must be one of color, bw (got {:?})",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaperSize {
    A4,
    Letter,
}

impl PaperSize {
    /// Media keyword understood by CUPS.
    pub fn media_name(self) -> &'static str {
        match self {
            PaperSize::A4 => "A4",
            PaperSize::Letter => "Letter",
        }
    }
}

impl FromStr for PaperSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A4" => Ok(PaperSize::A4),
            "Letter" => Ok(PaperSize::Letter),
            _ => Err(Error::validation(format!(
                "paperSize must be one of A4, Letter (got {:?})",
                s
            ))),
        }
    }
}

/// Validated print options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOptions {
    pub copies: u32,
    pub color_mode: ColorMode,
    pub duplex: bool,
    pub paper_size: PaperSize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            copies: 1,
            color_mode: ColorMode::Bw,
            duplex: false,
            paper_size: PaperSize::A4,
        }
    }
}

/// Print options as received from the frontend, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOptionsInput {
    pub copies: i64,
    pub color_mode: String,
    pub duplex: bool,
    pub paper_size: String,
}

impl Default for PrintOptionsInput {
    fn default() -> Self {
        Self {
            copies: 1,
            color_mode: "bw".to_string(),
            duplex: false,
            paper_size: "A4".to_string(),
        }
    }
}

impl From<PrintOptions> for PrintOptionsInput {
    fn from(options: PrintOptions) -> Self {
        Self {
            copies: i64::from(options.copies),
            color_mode: match options.color_mode {
                ColorMode::Color => "color".to_string(),
                ColorMode::Bw => "bw".to_string(),
            },
            duplex: options.duplex,
            paper_size: options.paper_size.media_name().to_string(),
        }
    }
}

// =============================================================================
// Pricing
// =============================================================================

/// Price of a job in paise. Derived from options and page counts only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub total_pages: u32,
    pub color_pages: u32,
    pub bw_pages: u32,
    pub base_price: u64,
    pub duplex_discount: u64,
    pub total_price: u64,
}

// =============================================================================
// Jobs
// =============================================================================

/// A print job. Owned by the print manager; callers get clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: JobId,
    pub session_id: SessionId,
    pub files: Vec<FileId>,
    pub options: PrintOptions,
    pub pricing: PriceBreakdown,
    pub status: JobStatus,
    /// Percent complete, 0..=100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintResult {
    pub job_id: JobId,
    pub success: bool,
    pub status: JobStatus,
    pub files_printed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a missing file or the printer ended this attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<ErrorCategory>,
    pub duration_ms: u64,
}

/// Progress notification emitted while a job executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: JobId,
    pub session_id: SessionId,
    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Receives progress from the print manager.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &JobProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&JobProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &JobProgress) {
        self(progress)
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queued: usize,
    pub printing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub active_executions: usize,
    pub max_concurrent: usize,
}

// =============================================================================
// Printers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    Online,
    Offline,
    Error,
    Busy,
}

impl PrinterState {
    /// Whether new jobs may be queued against a printer in this state.
    pub fn accepts_jobs(self) -> bool {
        matches!(self, PrinterState::Online | PrinterState::Busy)
    }
}

/// A printer as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterInfo {
    pub name: String,
    pub is_default: bool,
    pub status: PrinterState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl PrinterInfo {
    pub fn online(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_default: false,
            status: PrinterState::Online,
            location: None,
        }
    }
}

/// Snapshot answered by the printer-status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatus {
    pub printers: Vec<PrinterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_printer: Option<String>,
    pub available: bool,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Printing));
        assert!(JobStatus::Printing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Printing.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));

        for to in [JobStatus::Queued, JobStatus::Printing, JobStatus::Completed, JobStatus::Failed] {
            assert!(!JobStatus::Completed.can_transition_to(to));
        }
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Printing));
        assert!(!JobStatus::Printing.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!("bw".parse::<ColorMode>().unwrap(), ColorMode::Bw);
        assert_eq!("color".parse::<ColorMode>().unwrap(), ColorMode::Color);
        assert!(matches!("red".parse::<ColorMode>(), Err(Error::Validation(_))));

        assert_eq!("A4".parse::<PaperSize>().unwrap(), PaperSize::A4);
        assert_eq!("Letter".parse::<PaperSize>().unwrap(), PaperSize::Letter);
        assert!(matches!("Legal".parse::<PaperSize>(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(PrintOptions::default()).unwrap();
        assert_eq!(json["colorMode"], "bw");
        assert_eq!(json["paperSize"], "A4");

        let input: PrintOptionsInput = serde_json::from_value(serde_json::json!({
            "copies": 2, "colorMode": "color", "duplex": true, "paperSize": "Letter"
        }))
        .unwrap();
        assert_eq!(input.copies, 2);
        assert_eq!(PrintOptionsInput::from(PrintOptions::default()), PrintOptionsInput::default());
    }
}
