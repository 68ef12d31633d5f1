//! Customer session lifecycle.
//!
//! A session is a time-boxed, isolated workspace on disk plus an entry in the
//! active map. See [`SessionManager`].

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{
    FileMetadata, OrphanCleanupReport, PaymentStatus, Session, SessionStatus, TerminationReason,
};
