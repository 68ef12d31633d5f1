//! Job status listeners.
//!
//! Listeners are invoked synchronously, in registration order. Each call is
//! isolated: a panicking listener is logged and skipped, the rest still run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::failsafe::with_recovery;
use crate::printing::JobStatus;
use crate::types::{JobId, ListenerId, SessionId};

/// Emitted on every job transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub session_id: SessionId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Receives status updates.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, update: &StatusUpdate);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusUpdate) + Send + Sync,
{
    fn on_status(&self, update: &StatusUpdate) {
        self(update)
    }
}

/// Forwards updates into a bounded channel.
///
/// When the receiver falls behind, new updates are dropped rather than
/// blocking the job that emitted them.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::Sender<StatusUpdate>,
}

impl ChannelListener {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl StatusListener for ChannelListener {
    fn on_status(&self, update: &StatusUpdate) {
        if let Err(e) = self.tx.try_send(update.clone()) {
            tracing::warn!(
                "status_update_dropped: job_id={}, status={}, reason={}",
                update.job_id,
                update.status,
                match e {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                }
            );
        }
    }
}

type Registered = (ListenerId, Arc<dyn StatusListener>);

/// Ordered listener registry.
#[derive(Default)]
pub struct StatusBroadcaster {
    listeners: RwLock<Vec<Registered>>,
}

impl std::fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBroadcaster")
            .field("listeners", &self.len())
            .finish()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn StatusListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id.clone(), listener));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unregister(&self, id: &ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(registered, _)| registered != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an update to every listener. Returns how many listeners failed.
    pub fn dispatch(&self, update: &StatusUpdate) -> usize {
        // Snapshot so listeners may (un)register from inside a callback.
        let listeners: Vec<Registered> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut failed = 0;
        for (id, listener) in listeners {
            let delivered = with_recovery(
                || {
                    listener.on_status(update);
                    Ok(())
                },
                "status_listener",
            );
            if delivered.is_err() {
                tracing::warn!("status_listener_failed: listener_id={}, job_id={}", id, update.job_id);
                failed += 1;
            }
        }
        failed
    }
}
