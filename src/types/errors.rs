//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Messages never carry original file names
//! or customer details; callers refer to files and sessions by id.

use thiserror::Error;

use crate::failsafe::ErrorCategory;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the kiosk core.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (bad print options, oversized uploads, limits).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (session, job, file).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid state transition (job or session in the wrong state).
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Concurrency ceiling reached; the caller must resubmit.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Printer missing, offline or in error.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Cancellation of an in-flight operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map onto the error-handler taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::NotFound(_) => ErrorCategory::Session,
            Error::StateTransition(_) => ErrorCategory::Validation,
            Error::CapacityExceeded(_) => ErrorCategory::Resource,
            Error::Unavailable(_) => ErrorCategory::Printer,
            Error::Cancelled(_) => ErrorCategory::Printer,
            Error::Timeout(_) => ErrorCategory::Network,
            Error::Internal(_) => ErrorCategory::System,
            Error::Serialization(_) => ErrorCategory::File,
            Error::Io(_) => ErrorCategory::File,
        }
    }

    /// Whether this error was rejected up front rather than failing mid-flight.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::StateTransition(_)
                | Error::CapacityExceeded(_)
                | Error::Unavailable(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}
