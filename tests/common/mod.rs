//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kiosk_core::failsafe::{NetworkProbe, NetworkStatus};
use kiosk_core::printing::{PrintOptions, PrintSpooler, StaticBackend};
use kiosk_core::{Config, KioskAgent, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Network that never goes down.
#[derive(Debug)]
pub struct AlwaysUp;

#[async_trait]
impl NetworkProbe for AlwaysUp {
    async fn probe(&self) -> NetworkStatus {
        NetworkStatus::default()
    }
}

/// Accepts every file and counts them.
#[derive(Debug, Default)]
pub struct CountingSpooler {
    pub printed: AtomicUsize,
}

#[async_trait]
impl PrintSpooler for CountingSpooler {
    async fn print_file(
        &self,
        _printer: &str,
        _file: &Path,
        _options: &PrintOptions,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.printed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Holds every file until cancelled.
#[derive(Debug, Default)]
pub struct StuckSpooler {
    pub started: AtomicUsize,
}

#[async_trait]
impl PrintSpooler for StuckSpooler {
    async fn print_file(
        &self,
        _printer: &str,
        _file: &Path,
        _options: &PrintOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Err(kiosk_core::Error::cancelled("cancelled"))
    }
}

pub fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.workspace.root = dir.join("sessions");
    config.audit.log_dir = dir.join("audit");
    config
}

pub async fn agent_with(config: Config, spooler: Arc<dyn PrintSpooler>) -> KioskAgent {
    let agent = KioskAgent::with_components(
        config,
        Box::new(StaticBackend::single("Front_Desk")),
        spooler,
        Some(Arc::new(AlwaysUp)),
    )
    .await
    .unwrap();
    agent.bootstrap().await;
    agent
}

pub async fn agent(dir: &Path) -> (KioskAgent, Arc<CountingSpooler>) {
    let spooler = Arc::new(CountingSpooler::default());
    (agent_with(config(dir), spooler.clone()).await, spooler)
}
