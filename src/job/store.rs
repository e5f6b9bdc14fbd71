//! Job record store — compare-and-set transitions over durable job state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::model::{Job, JobStatus};
use crate::notify::{ProgressEvent, ProgressNotifier};

/// Backend-agnostic store for job records.
///
/// `transition` is the only mutation path and is a strict compare-and-set:
/// it succeeds only if the stored status matches `from`, which makes
/// duplicate message delivery idempotent. Callers decide what a `Conflict`
/// means; the store never retries.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails if the id already exists.
    async fn create(&self, job: Job) -> Result<Uuid, StoreError>;

    /// Fetch a job by id.
    async fn get(&self, id: Uuid) -> Result<Job, StoreError>;

    /// Compare-and-set status transition. Refreshes `updated_at` and, for
    /// terminal transitions, sets `result` exactly once.
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        result: Option<String>,
    ) -> Result<Job, StoreError>;

    /// Jobs still `Running` whose last transition happened before `cutoff`.
    /// Used by the reaper to detect lost workers.
    async fn running_since_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;
}

/// In-memory job store.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<Uuid, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists { id: job.id });
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        result: Option<String>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound { id })?;

        if job.status != from {
            return Err(StoreError::Conflict {
                id,
                expected: from.to_string(),
                actual: job.status.to_string(),
            });
        }
        if !from.can_transition_to(to) {
            return Err(StoreError::Conflict {
                id,
                expected: from.to_string(),
                actual: format!("{from} -> {to} is not a valid transition"),
            });
        }

        job.status = to;
        job.updated_at = Utc::now();
        if to.is_terminal() {
            job.result = result;
        }

        Ok(job.clone())
    }

    async fn running_since_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Running && j.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

/// Spawn a background task that fails jobs stuck in `Running`.
///
/// The strict `Pending -> Running` tie-break means a worker crash mid-run
/// would otherwise leave its job `Running` forever. The reaper resolves the
/// gap without regressing status: stuck jobs transition `Running -> Failed`,
/// subscribers get the terminal error event, and the progress channel is
/// closed.
pub fn spawn_reaper(
    store: Arc<dyn JobStore>,
    notifier: Arc<ProgressNotifier>,
    stuck_threshold: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;

            let cutoff = Utc::now()
                - chrono::Duration::from_std(stuck_threshold).unwrap_or(chrono::Duration::zero());
            let stuck = match store.running_since_before(cutoff).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::warn!(error = %e, "Reaper scan failed");
                    continue;
                }
            };

            for job in stuck {
                let reason = format!(
                    "worker lost: no progress since {}",
                    job.updated_at.to_rfc3339()
                );
                match store
                    .transition(
                        job.id,
                        JobStatus::Running,
                        JobStatus::Failed,
                        Some(reason.clone()),
                    )
                    .await
                {
                    Ok(_) => {
                        tracing::warn!(job_id = %job.id, "Reaped stuck job");
                        notifier
                            .push(
                                job.id,
                                ProgressEvent::Error {
                                    job_id: job.id,
                                    message: reason,
                                },
                            )
                            .await;
                        notifier.complete(job.id).await;
                    }
                    // Lost the race with a live worker; nothing to do.
                    Err(StoreError::Conflict { .. }) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "Reaper transition failed");
                    }
                }
            }
        }
    })
}
