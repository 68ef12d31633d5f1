//! # Kiosk Core - Print Kiosk Agent
//!
//! Rust implementation of the shop-local kiosk agent providing:
//! - Isolated, time-boxed customer sessions with on-disk workspaces
//! - Printer discovery and bounded, cancellable print job execution
//! - Job coordination with pricing, status listeners and a transaction ledger
//! - Fail-closed error handling with network, resource and integrity monitors
//! - Privacy-filtered, rotating audit logs
//!
//! ## Architecture
//!
//! The [`KioskAgent`] owns one instance of each manager and shares them via `Arc`:
//! ```text
//!                    ┌──────────────────────────────────────┐
//!   frontend     →   │            PrintJobService           │ → StatusListeners
//!                    │   ┌────────────┐    ┌─────────────┐  │
//!                    │   │  Session   │    │   Print     │  │
//!                    │   │  Manager   │    │   Manager   │──┼→ OS spooler
//!                    │   └────────────┘    └─────────────┘  │
//!                    │          ↑   ErrorHandler   ↑        │
//!                    │          └──── fail-closed ─┘        │
//!                    │              AuditLogger             │
//!                    └──────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod agent;
pub mod audit;
pub mod config_source;
pub mod failsafe;
pub mod jobs;
pub mod printing;
pub mod session;
pub mod types;
pub mod validation;

// Internal utilities
pub mod observability;
pub mod tasks;

pub use agent::KioskAgent;
pub use types::{Config, Error, Result};
