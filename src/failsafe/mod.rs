//! Fail-safe error handling.
//!
//! Errors are classified by category and severity, kept in a bounded history
//! and audited. Critical and security errors trigger fail-closed recovery:
//! every active session is terminated. Periodic monitors feed the handler
//! with network, resource and integrity findings.

mod classify;
mod handler;
mod monitor;
mod recovery;

pub use classify::{
    classify, classify_category, classify_severity, is_retryable, ErrorCategory, ErrorSeverity,
    SystemError,
};
pub use handler::{
    ErrorHandler, FailClosedReport, HandlerEvent, IntegrityReport, SessionFailure, SystemStatus,
};
pub use monitor::{
    assess_resources, HttpProbe, NetworkProbe, NetworkStatus, ResourceCondition, ResourceFinding,
    ResourceSampler, ResourceSnapshot,
};
pub use recovery::{with_recovery, with_recovery_async};
