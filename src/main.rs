//! Kiosk agent daemon - main entry point.
//!
//! Loads configuration, recovers sessions left by the previous run, detects
//! printers and runs the background sweeps and monitors until signalled.

use clap::Parser;
use std::path::PathBuf;

use kiosk_core::{Config, KioskAgent};

#[derive(Debug, Parser)]
#[command(name = "kiosk-agent", version, about = "Shop-local print kiosk agent")]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Disable fail-closed recovery.
    #[arg(long)]
    no_fail_closed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    if cli.no_fail_closed {
        config.monitor.fail_closed = false;
    }
    config.validate()?;

    // Initialize observability
    kiosk_core::observability::init_tracing_with(&config.observability);

    let agent = KioskAgent::new(config).await?;
    let report = agent.bootstrap().await;
    agent.start().await;

    tracing::info!(
        "kiosk_agent_running: workspace={}, restored_sessions={}",
        agent.config().workspace.root.display(),
        report.restored
    );

    shutdown_signal().await?;
    agent.shutdown().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    tracing::info!("shutdown_signal_received");
    Ok(())
}
