//! Network and host resource probes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{Disks, ProcessesToUpdate, System};

use super::classify::ErrorSeverity;
use crate::types::MonitorConfig;

// =============================================================================
// Network
// =============================================================================

/// Result of the last reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        // Assume connectivity until a probe says otherwise, so the first
        // failed probe is reported as a transition.
        Self {
            connected: true,
            latency_ms: None,
            last_checked: None,
            error: None,
        }
    }
}

/// Reachability check.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self) -> NetworkStatus;
}

/// Bounded-timeout HTTP GET against a known endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("network_probe_client_fallback: error={}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.network_probe_url.clone(), config.network_probe_timeout)
    }
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn probe(&self) -> NetworkStatus {
        let started = Instant::now();
        let result = self.client.get(&self.url).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            // Any HTTP answer proves reachability.
            Ok(_) => NetworkStatus {
                connected: true,
                latency_ms: Some(latency_ms),
                last_checked: Some(Utc::now()),
                error: None,
            },
            Err(e) => NetworkStatus {
                connected: false,
                latency_ms: None,
                last_checked: Some(Utc::now()),
                error: Some(if e.is_timeout() {
                    "network probe timed out".to_string()
                } else {
                    format!("network probe failed: {}", e)
                }),
            },
        }
    }
}

// =============================================================================
// Resources
// =============================================================================

/// One sample of host resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    /// Agent process RSS as a share of total host memory.
    pub memory_percent: f64,
    pub process_rss_bytes: u64,
    /// Free space on the volume holding the workspace; `None` if unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_free_bytes: Option<u64>,
    pub cpu_percent: f32,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Samples host resources with `sysinfo`.
#[derive(Debug)]
pub struct ResourceSampler {
    system: System,
    disks: Disks,
    workspace: PathBuf,
}

impl ResourceSampler {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            workspace: workspace.into(),
        }
    }

    pub fn sample(&mut self) -> ResourceSnapshot {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let process_rss_bytes = match sysinfo::get_current_pid() {
            Ok(pid) => {
                self.system
                    .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                self.system.process(pid).map_or(0, |p| p.memory())
            }
            Err(_) => 0,
        };
        let memory_percent = process_memory_percent(process_rss_bytes, self.system.total_memory());

        self.disks.refresh(true);
        let disk_free_bytes = volume_free_space(
            &self.workspace,
            self.disks
                .list()
                .iter()
                .map(|d| (d.mount_point(), d.available_space())),
        );

        ResourceSnapshot {
            memory_percent,
            process_rss_bytes,
            disk_free_bytes,
            cpu_percent: self.system.global_cpu_usage(),
            sampled_at: Some(Utc::now()),
        }
    }
}

fn process_memory_percent(rss: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (rss as f64 * 100.0 / total as f64).min(100.0)
}

/// Free space of the mount with the longest prefix of `path`.
fn volume_free_space<'a>(
    path: &Path,
    mounts: impl Iterator<Item = (&'a Path, u64)>,
) -> Option<u64> {
    mounts
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, free)| free)
}

/// A resource threshold that can be breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCondition {
    MemoryHigh,
    DiskLow,
    DiskExhausted,
}

/// One breached threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFinding {
    pub condition: ResourceCondition,
    pub severity: ErrorSeverity,
    pub message: String,
}

/// Threshold breaches in a snapshot.
pub fn assess_resources(snapshot: &ResourceSnapshot, config: &MonitorConfig) -> Vec<ResourceFinding> {
    let mut findings = Vec::new();
    if snapshot.memory_percent >= config.memory_threshold_percent {
        findings.push(ResourceFinding {
            condition: ResourceCondition::MemoryHigh,
            severity: ErrorSeverity::Medium,
            message: format!(
                "agent memory usage {:.1}% exceeds {:.1}%",
                snapshot.memory_percent, config.memory_threshold_percent
            ),
        });
    }
    if let Some(free) = snapshot.disk_free_bytes {
        if free <= config.disk_critical_bytes {
            findings.push(ResourceFinding {
                condition: ResourceCondition::DiskExhausted,
                severity: ErrorSeverity::Critical,
                message: format!("disk space exhausted: {} bytes free", free),
            });
        } else if free <= config.disk_low_bytes {
            findings.push(ResourceFinding {
                condition: ResourceCondition::DiskLow,
                severity: ErrorSeverity::Medium,
                message: format!("disk space low: {} bytes free", free),
            });
        }
    }
    findings
}
