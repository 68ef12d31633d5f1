//! Hand-off of single files to the OS spooler.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::runner::{run_command, CommandSpec};
use super::types::{ColorMode, PrintOptions};
use crate::types::{Error, Result};

/// "Print this file on this printer."
///
/// Returning `Ok` means the spooler accepted the file; what the printer does
/// afterwards is outside the agent's control.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrintSpooler: Send + Sync {
    async fn print_file(
        &self,
        printer: &str,
        file: &Path,
        options: &PrintOptions,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Target platform for command construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// How a file is handed to the print command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Document,
    Image,
    Text,
}

impl FileKind {
    fn of(file: &Path) -> Self {
        let mime = mime_guess::from_path(file).first_or_octet_stream();
        if mime.type_() == mime_guess::mime::IMAGE {
            FileKind::Image
        } else if mime.type_() == mime_guess::mime::TEXT {
            FileKind::Text
        } else {
            FileKind::Document
        }
    }
}

/// Spooler that shells out to `lp` or PowerShell.
#[derive(Debug, Clone)]
pub struct CommandSpooler {
    platform: Platform,
    timeout: Duration,
    command_override: Option<Vec<String>>,
}

impl CommandSpooler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            platform: Platform::current(),
            timeout,
            command_override: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the built-in command. `{printer}`, `{file}` and `{copies}` are
    /// substituted in every argument.
    pub fn with_command_override(mut self, command: Option<Vec<String>>) -> Self {
        self.command_override = command.filter(|c| !c.is_empty());
        self
    }

    /// Commands to run, in order, for one file.
    pub fn build_commands(
        &self,
        printer: &str,
        file: &Path,
        options: &PrintOptions,
    ) -> Result<Vec<CommandSpec>> {
        let file_str = file
            .to_str()
            .ok_or_else(|| Error::validation("print file path is not valid UTF-8"))?;

        if let Some(template) = &self.command_override {
            let substitute = |arg: &String| {
                arg.replace("{printer}", printer)
                    .replace("{file}", file_str)
                    .replace("{copies}", &options.copies.to_string())
            };
            let mut parts = template.iter().map(substitute);
            let program = parts
                .next()
                .ok_or_else(|| Error::validation("empty print command override"))?;
            return Ok(vec![CommandSpec::new(program).args(parts)]);
        }

        let kind = FileKind::of(file);
        Ok(match self.platform {
            Platform::Unix => vec![lp_command(printer, file_str, options, kind)],
            // PrintTo verbs have no copy count.
            Platform::Windows => {
                let one = windows_command(printer, file_str, kind);
                vec![one; options.copies.max(1) as usize]
            }
        })
    }
}

fn lp_command(printer: &str, file: &str, options: &PrintOptions, kind: FileKind) -> CommandSpec {
    let mut spec = CommandSpec::new("lp")
        .args(["-d", printer])
        .args(["-n".to_string(), options.copies.to_string()])
        .arg("-o")
        .arg(if options.duplex {
            "sides=two-sided-long-edge"
        } else {
            "sides=one-sided"
        })
        .arg("-o")
        .arg(format!("media={}", options.paper_size.media_name()));
    if options.color_mode == ColorMode::Bw {
        spec = spec.args(["-o", "ColorModel=Gray"]);
    }
    match kind {
        FileKind::Image => spec = spec.args(["-o", "fit-to-page"]),
        FileKind::Text => spec = spec.args(["-o", "document-format=text/plain"]),
        FileKind::Document => {}
    }
    spec.arg("--").arg(file)
}

fn windows_command(printer: &str, file: &str, kind: FileKind) -> CommandSpec {
    match kind {
        FileKind::Image => CommandSpec::new("mspaint.exe").args(["/pt", file, printer]),
        FileKind::Text => CommandSpec::new("notepad.exe").args(["/pt", file, printer]),
        FileKind::Document => {
            let script = format!(
                "Start-Process -FilePath '{}' -Verb PrintTo -ArgumentList '\"{}\"' -Wait -WindowStyle Hidden",
                ps_quote(file),
                ps_quote(printer)
            );
            CommandSpec::new("powershell").args(["-NoProfile", "-NonInteractive", "-Command"]).arg(script)
        }
    }
}

/// Escape for a single-quoted PowerShell string.
fn ps_quote(s: &str) -> String {
    s.replace('\'', "''")
}

#[async_trait]
impl PrintSpooler for CommandSpooler {
    async fn print_file(
        &self,
        printer: &str,
        file: &Path,
        options: &PrintOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for spec in self.build_commands(printer, file, options)? {
            let output = run_command(&spec, self.timeout, cancel).await?;
            tracing::debug!(
                "spooler_accepted: program={}, elapsed_ms={}",
                spec.program,
                output.elapsed.as_millis()
            );
        }
        Ok(())
    }
}
