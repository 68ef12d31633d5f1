//! Privacy-filtered audit logging.
//!
//! Every state transition in the agent is recorded here. Metadata passes the
//! [`privacy`] filter before it is written; the transaction ledger is financial
//! data and is stored as given.

mod logger;
pub mod privacy;
mod types;

pub use logger::AuditLogger;
pub use types::{
    event_types, AuditEvent, AuditHealth, AuditStatistics, EventFilter, RetentionStats,
    TransactionOutcome, TransactionRecord, SYSTEM_SCOPE,
};
