//! Printer discovery backends.
//!
//! Each backend asks the OS print subsystem for its printers and normalizes the
//! answer to [`PrinterInfo`]. Parsing is kept in pure functions so it can be
//! tested without a print system.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::runner::{run_command, CommandSpec};
use super::types::{PrinterInfo, PrinterState};
use crate::types::{Error, Result};

/// Source of printer information.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrinterBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Enumerate printers, with the OS default flagged.
    async fn list_printers(&self) -> Result<Vec<PrinterInfo>>;
}

/// Backend for the current platform.
pub fn platform_backend(timeout: Duration) -> Box<dyn PrinterBackend> {
    if cfg!(windows) {
        Box::new(WindowsBackend::new(timeout))
    } else {
        Box::new(CupsBackend::new(timeout))
    }
}

// =============================================================================
// CUPS
// =============================================================================

/// CUPS via `lpstat -p -d`.
#[derive(Debug, Clone)]
pub struct CupsBackend {
    timeout: Duration,
}

impl CupsBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PrinterBackend for CupsBackend {
    fn name(&self) -> &'static str {
        "cups"
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        let spec = CommandSpec::new("lpstat").args(["-p", "-d"]);
        let output = run_command(&spec, self.timeout, &CancellationToken::new()).await?;
        Ok(parse_lpstat(&output.stdout))
    }
}

/// Parse `lpstat -p -d` output.
///
/// ```text
/// printer Office_Laser is idle.  enabled since Mon 19 Oct 2026 09:12:01
/// printer Photo now printing Photo-17.  enabled since ...
/// printer Old_Inkjet disabled since ... -
///         Paused
/// system default destination: Office_Laser
/// ```
pub fn parse_lpstat(output: &str) -> Vec<PrinterInfo> {
    let mut printers = Vec::new();
    let mut default = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("printer ") {
            let mut parts = rest.splitn(2, ' ');
            let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
                continue;
            };
            let detail = parts.next().unwrap_or_default().to_ascii_lowercase();
            let status = if detail.contains("disabled") {
                PrinterState::Offline
            } else if detail.contains("now printing") {
                PrinterState::Busy
            } else if detail.contains("idle") || detail.contains("enabled") {
                PrinterState::Online
            } else {
                PrinterState::Error
            };
            printers.push(PrinterInfo {
                name: name.to_string(),
                is_default: false,
                status,
                location: None,
            });
        } else if let Some(name) = line.strip_prefix("system default destination:") {
            default = Some(name.trim().to_string());
        }
    }

    if let Some(default) = default {
        for printer in &mut printers {
            printer.is_default = printer.name == default;
        }
    }
    printers
}

// =============================================================================
// Windows
// =============================================================================

/// Windows via PowerShell `Win32_Printer`.
#[derive(Debug, Clone)]
pub struct WindowsBackend {
    timeout: Duration,
}

impl WindowsBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

const WIN32_PRINTER_QUERY: &str = "Get-CimInstance -ClassName Win32_Printer | \
     Select-Object Name,Default,PrinterStatus,WorkOffline,Location | ConvertTo-Json -Compress";

#[async_trait]
impl PrinterBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        let spec = CommandSpec::new("powershell").args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            WIN32_PRINTER_QUERY,
        ]);
        let output = run_command(&spec, self.timeout, &CancellationToken::new()).await?;
        parse_win32_printers(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Win32Printer {
    name: String,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    printer_status: Option<u16>,
    #[serde(default)]
    work_offline: bool,
    #[serde(default)]
    location: Option<String>,
}

/// `ConvertTo-Json` emits a bare object for a single printer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Win32Printer>),
    One(Win32Printer),
}

/// Parse the JSON emitted by the Win32_Printer query.
pub fn parse_win32_printers(json: &str) -> Result<Vec<PrinterInfo>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: OneOrMany = serde_json::from_str(json)
        .map_err(|e| Error::unavailable(format!("unreadable printer list: {}", e)))?;
    let raw = match parsed {
        OneOrMany::Many(list) => list,
        OneOrMany::One(one) => vec![one],
    };
    Ok(raw
        .into_iter()
        .map(|p| PrinterInfo {
            status: if p.work_offline {
                PrinterState::Offline
            } else {
                win32_state(p.printer_status)
            },
            name: p.name,
            is_default: p.default,
            location: p.location.filter(|l| !l.trim().is_empty()),
        })
        .collect())
}

/// Map `Win32_Printer.PrinterStatus`.
fn win32_state(code: Option<u16>) -> PrinterState {
    match code {
        // Other, Unknown, Idle
        None | Some(1) | Some(2) | Some(3) => PrinterState::Online,
        // Printing, Warmup
        Some(4) | Some(5) => PrinterState::Busy,
        Some(7) => PrinterState::Offline,
        _ => PrinterState::Error,
    }
}

// =============================================================================
// Static
// =============================================================================

/// Fixed printer list, for kiosks with a known printer and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    printers: Vec<PrinterInfo>,
}

impl StaticBackend {
    pub fn new(printers: Vec<PrinterInfo>) -> Self {
        Self { printers }
    }

    /// A single online printer, flagged as default.
    pub fn single(name: impl Into<String>) -> Self {
        let mut printer = PrinterInfo::online(name);
        printer.is_default = true;
        Self::new(vec![printer])
    }
}

#[async_trait]
impl PrinterBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        Ok(self.printers.clone())
    }
}
