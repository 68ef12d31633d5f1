//! Configuration source consumed by the agent.
//!
//! The shop's configuration UI owns the real store. The agent only needs to
//! read the current values, push validated updates and list known printers.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{Config, Result};

/// Where the running agent gets its configuration from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn get_configuration(&self) -> Result<Config>;

    /// Replace the configuration. Invalid values are rejected and nothing changes.
    async fn update_configuration(&self, config: Config) -> Result<()>;

    async fn validate_configuration(&self, config: &Config) -> Result<()>;

    /// Restore defaults and return them.
    async fn reset_defaults(&self) -> Result<Config>;

    /// Printer names the shop has registered.
    async fn list_printers(&self) -> Result<Vec<String>>;
}

/// Configuration held in memory, seeded from a file or defaults.
#[derive(Debug, Default)]
pub struct InMemoryConfigSource {
    config: RwLock<Config>,
    printers: RwLock<Vec<String>>,
}

impl InMemoryConfigSource {
    pub fn new(config: Config) -> Self {
        let printers = config.printer.default_printer.iter().cloned().collect();
        Self {
            config: RwLock::new(config),
            printers: RwLock::new(printers),
        }
    }

    /// Register a printer name; duplicates are ignored.
    pub async fn add_printer(&self, name: impl Into<String>) {
        let name = name.into();
        let mut printers = self.printers.write().await;
        if !printers.contains(&name) {
            printers.push(name);
        }
    }
}

#[async_trait]
impl ConfigurationSource for InMemoryConfigSource {
    async fn get_configuration(&self) -> Result<Config> {
        Ok(self.config.read().await.clone())
    }

    async fn update_configuration(&self, config: Config) -> Result<()> {
        self.validate_configuration(&config).await?;
        if let Some(name) = &config.printer.default_printer {
            self.add_printer(name.clone()).await;
        }
        *self.config.write().await = config;
        tracing::info!("configuration_updated");
        Ok(())
    }

    async fn validate_configuration(&self, config: &Config) -> Result<()> {
        config.validate()
    }

    async fn reset_defaults(&self) -> Result<Config> {
        let defaults = Config::default();
        *self.config.write().await = defaults.clone();
        tracing::info!("configuration_reset");
        Ok(defaults)
    }

    async fn list_printers(&self) -> Result<Vec<String>> {
        Ok(self.printers.read().await.clone())
    }
}
