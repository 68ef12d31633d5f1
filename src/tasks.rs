//! Periodic background tasks with graceful shutdown.
//!
//! Every task shares one cancellation token. A tick that panics or fails is
//! logged and the loop carries on with the next tick.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::failsafe::with_recovery_async;
use crate::types::Result;

/// How long `shutdown` waits for a task to notice cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct RegisteredTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Owner of a group of periodic tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run `tick` every `period`, starting after one period has elapsed.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let period = period.max(Duration::from_millis(10));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = with_recovery_async(tick(), name).await {
                            tracing::error!("background_task_failed: task={}, error={}", name, e);
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::debug!("background_task_stopped: task={}", name);
                        break;
                    }
                }
            }
        });
        tracing::debug!("background_task_registered: task={}, period_ms={}", name, period.as_millis());
        self.tasks.push(RegisteredTask { name, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks that ended without being cancelled.
    pub fn check_health(&self) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }
        let finished: Vec<&str> = self
            .tasks
            .iter()
            .filter(|t| t.handle.is_finished())
            .map(|t| t.name)
            .collect();
        for name in &finished {
            tracing::error!("background_task_exited: task={}", name);
        }
        finished.len()
    }

    /// Cancel every task and wait for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("background_task_join_failed: task={}, error={}", task.name, e),
                Err(_) => tracing::warn!("background_task_shutdown_timeout: task={}", task.name),
            }
        }
    }
}
