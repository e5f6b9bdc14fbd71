//! Progress notifier — per-job broadcast channel between the owning worker
//! and any caller observing the job.
//!
//! There is no replay: a subscriber that attaches after an event was pushed
//! never sees it. That is a deliberate simplicity trade-off; terminal state
//! is always recoverable from the job store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Broadcast capacity per job channel.
const CHANNEL_CAPACITY: usize = 64;

/// One frame on a job's progress stream.
///
/// Every job emits `running`, zero or more `milestone` frames, and exactly
/// one of `completed` or `error` as the terminal frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Running {
        job_id: Uuid,
    },
    Milestone {
        job_id: Uuid,
        label: String,
        detail: serde_json::Value,
    },
    Completed {
        job_id: Uuid,
        result: String,
    },
    Error {
        job_id: Uuid,
        message: String,
    },
}

impl ProgressEvent {
    /// Check if this is a terminal frame.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// Per-job broadcast channels, keyed by job id.
pub struct ProgressNotifier {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressNotifier {
    /// Create a notifier with no open channels.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or attach to) the channel for a job and subscribe.
    pub async fn open_channel(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe as a `Stream`, for long-lived consumers.
    pub async fn stream(&self, job_id: Uuid) -> BroadcastStream<ProgressEvent> {
        BroadcastStream::new(self.open_channel(job_id).await)
    }

    /// Push an event to a job's subscribers.
    ///
    /// A push after `complete` (or to a job whose channel was never opened)
    /// is a no-op. Send errors mean no receiver is currently listening,
    /// which is fine.
    pub async fn push(&self, job_id: Uuid, event: ProgressEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&job_id) {
            let _ = tx.send(event);
        } else {
            tracing::debug!(job_id = %job_id, "Progress push with no open channel");
        }
    }

    /// Close a job's channel. Idempotent; dropping the sender ends every
    /// subscriber's stream.
    pub async fn complete(&self, job_id: Uuid) {
        self.channels.write().await.remove(&job_id);
    }

    /// Unconditional removal for shutdown and cleanup paths that must never
    /// leak a channel, regardless of the job's state.
    pub async fn force_remove(&self, job_id: Uuid) {
        self.channels.write().await.remove(&job_id);
    }

    /// Check whether a job currently has an open channel.
    pub async fn is_open(&self, job_id: Uuid) -> bool {
        self.channels.read().await.contains_key(&job_id)
    }

    /// Number of open channels.
    pub async fn open_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}
