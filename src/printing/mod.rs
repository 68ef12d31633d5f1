//! Printer discovery, job queueing and execution.
//!
//! - [`PrinterBackend`]: asks the OS which printers exist
//! - [`PrintSpooler`]: hands one file to the OS spooler
//! - [`PrintManager`]: owns jobs, enforces the execution ceiling, tracks progress

pub mod backend;
mod manager;
mod pricing;
pub mod runner;
pub mod spooler;
mod types;

pub use backend::{platform_backend, CupsBackend, PrinterBackend, StaticBackend, WindowsBackend};
pub use manager::{PrintManager, CANCELLED_REASON};
pub use pricing::calculate_price;
pub use spooler::{CommandSpooler, Platform, PrintSpooler};
pub use types::{
    ColorMode, JobProgress, JobStatus, PaperSize, PriceBreakdown, PrintJob, PrintOptions,
    PrintOptionsInput, PrintResult, PrinterInfo, PrinterState, PrinterStatus, ProgressObserver,
    QueueStatus,
};
