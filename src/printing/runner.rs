//! External command runner with a deadline and cancellation.
//!
//! The child is spawned with `kill_on_drop`, and the wait future owns it. When
//! the deadline or the cancellation token wins the race, the wait future is
//! dropped, which kills the child. That drop is the only kill path, so a
//! child is killed at most once.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::types::{Error, Result};

/// Stderr excerpts in errors are capped at this many characters.
const MAX_STDERR_CHARS: usize = 500;

/// Program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Run a command to completion.
///
/// Errors:
/// - spawn failure: `Unavailable`
/// - non-zero exit: `Unavailable` with a stderr excerpt
/// - deadline: `Timeout`
/// - cancellation: `Cancelled`
pub async fn run_command(
    spec: &CommandSpec,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::unavailable(format!("failed to spawn {}: {}", spec.program, e)))?;

    let output = tokio::select! {
        result = child.wait_with_output() => result?,
        _ = tokio::time::sleep(deadline) => {
            tracing::warn!("command_timed_out: program={}, deadline_ms={}", spec.program, deadline.as_millis());
            return Err(Error::timeout(format!(
                "{} did not finish within {}s",
                spec.program,
                deadline.as_secs()
            )));
        }
        _ = cancel.cancelled() => {
            tracing::info!("command_cancelled: program={}", spec.program);
            return Err(Error::cancelled(format!("{} was cancelled", spec.program)));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(Error::unavailable(format!(
            "{} exited with {}: {}",
            spec.program,
            code,
            excerpt(&stderr)
        )));
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        elapsed: started.elapsed(),
    })
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    match trimmed.char_indices().nth(MAX_STDERR_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
