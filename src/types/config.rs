//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and environment variables. Every
//! section defaults sensibly, so an empty `{}` file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::{Error, Result};

/// Global agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Session workspace configuration.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Printer selection and execution limits.
    #[serde(default)]
    pub printer: PrinterConfig,

    /// Per-page pricing and job limits.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Audit log location, rotation and retention.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Error handler and monitors.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `KIOSK_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("KIOSK_WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("KIOSK_LOG_DIR") {
            self.audit.log_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("KIOSK_DEFAULT_PRINTER") {
            self.printer.default_printer = if name.is_empty() { None } else { Some(name) };
        }
        if let Some(n) = lookup("KIOSK_MAX_CONCURRENT_JOBS").and_then(|v| v.parse().ok()) {
            self.printer.max_concurrent_jobs = n;
        }
        if let Some(flag) = lookup("KIOSK_FAIL_CLOSED") {
            self.monitor.fail_closed = !matches!(flag.to_ascii_lowercase().as_str(), "0" | "false" | "off");
        }
    }

    /// Reject values the managers cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.workspace.session_timeout.is_zero() {
            return Err(Error::validation("workspace.session_timeout must be positive"));
        }
        if self.printer.max_concurrent_jobs == 0 {
            return Err(Error::validation("printer.max_concurrent_jobs must be positive"));
        }
        if self.printer.command_timeout.is_zero() {
            return Err(Error::validation("printer.command_timeout must be positive"));
        }
        if self.pricing.duplex_discount_percent > 100 {
            return Err(Error::validation("pricing.duplex_discount_percent must be <= 100"));
        }
        if self.pricing.default_pages_per_file == 0 {
            return Err(Error::validation("pricing.default_pages_per_file must be positive"));
        }
        if self.audit.max_file_size_bytes == 0 {
            return Err(Error::validation("audit.max_file_size_bytes must be positive"));
        }
        if !(0.0..=100.0).contains(&self.monitor.memory_threshold_percent) {
            return Err(Error::validation("monitor.memory_threshold_percent must be within 0..=100"));
        }
        if self.monitor.max_error_history == 0 {
            return Err(Error::validation("monitor.max_error_history must be positive"));
        }
        Ok(())
    }
}

/// Session workspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding one subdirectory per session.
    pub root: PathBuf,

    /// Session lifetime from creation.
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Largest accepted upload.
    pub max_file_size_bytes: u64,

    /// How often expired sessions are swept.
    #[serde(with = "humantime_serde")]
    pub expiry_sweep_interval: Duration,

    /// Shop identifier stamped on new sessions.
    pub shop_id: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("kiosk-sessions"),
            session_timeout: Duration::from_secs(30 * 60),
            max_file_size_bytes: 50 * 1024 * 1024,
            expiry_sweep_interval: Duration::from_secs(60),
            shop_id: "default".to_string(),
        }
    }
}

/// Printer selection and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrinterConfig {
    /// Configured default printer; wins over the OS default.
    pub default_printer: Option<String>,

    /// Ceiling on concurrently executing jobs. Requests beyond it fail fast.
    pub max_concurrent_jobs: usize,

    /// Hard deadline for one file's print command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// How long a discovered printer list is trusted before re-detection.
    #[serde(with = "humantime_serde")]
    pub status_ttl: Duration,

    /// Replaces the platform print command. `{printer}` and `{file}` are substituted.
    pub command_override: Option<Vec<String>>,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            default_printer: None,
            max_concurrent_jobs: 3,
            command_timeout: Duration::from_secs(5 * 60),
            status_ttl: Duration::from_secs(10),
            command_override: None,
        }
    }
}

/// Pricing in paise and per-job limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PricingConfig {
    pub bw_price_per_page: u64,
    pub color_price_per_page: u64,
    pub duplex_discount_percent: u64,
    /// Page estimate for files whose page count is unknown.
    pub default_pages_per_file: u32,
    pub max_files_per_job: usize,
    pub max_pages_per_job: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            bw_price_per_page: 200,
            color_price_per_page: 500,
            duplex_discount_percent: 10,
            default_pages_per_file: 2,
            max_files_per_job: 20,
            max_pages_per_job: 500,
        }
    }
}

/// Audit log location, rotation and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub log_dir: PathBuf,

    /// Active file size that triggers rotation.
    pub max_file_size_bytes: u64,

    /// Rotated files older than this (by mtime) are deleted.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("kiosk-audit"),
            max_file_size_bytes: 10 * 1024 * 1024,
            retention: Duration::from_secs(30 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Error handler and monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Terminate every active session on a critical error.
    pub fail_closed: bool,

    pub max_retry_attempts: u32,

    /// Delay before retry `n` is `retry_base_delay * n`.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Oldest entries are dropped beyond this.
    pub max_error_history: usize,

    pub network_probe_url: String,

    #[serde(with = "humantime_serde")]
    pub network_probe_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub network_check_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub resource_check_interval: Duration,

    pub memory_threshold_percent: f64,

    /// Free disk below this raises a high-severity resource error.
    pub disk_low_bytes: u64,

    /// Free disk below this is unrecoverable and fails closed.
    pub disk_critical_bytes: u64,

    #[serde(with = "humantime_serde")]
    pub integrity_check_interval: Duration,

    /// Deadline for a manager to answer an integrity probe.
    #[serde(with = "humantime_serde")]
    pub integrity_check_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fail_closed: true,
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            max_error_history: 1000,
            network_probe_url: "https://www.google.com/generate_204".to_string(),
            network_probe_timeout: Duration::from_secs(5),
            network_check_interval: Duration::from_secs(30),
            resource_check_interval: Duration::from_secs(60),
            memory_threshold_percent: 90.0,
            disk_low_bytes: 1024 * 1024 * 1024,
            disk_critical_bytes: 100 * 1024 * 1024,
            integrity_check_interval: Duration::from_secs(120),
            integrity_check_timeout: Duration::from_secs(5),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
