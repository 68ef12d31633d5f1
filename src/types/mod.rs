//! Core types for the kiosk agent.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (SessionId, JobId, FileId, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for workspace, printer, pricing, audit and monitors

mod config;
mod errors;
mod ids;

pub use config::{
    AuditConfig, Config, MonitorConfig, ObservabilityConfig, PricingConfig, PrinterConfig,
    WorkspaceConfig,
};
pub use errors::{Error, Result};
pub use ids::{ErrorId, EventId, FileId, JobId, ListenerId, SessionId, ShopId};
