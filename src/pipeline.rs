//! Pipeline facade — admission, submission, and observation.
//!
//! Submission is the only entry point that creates jobs: it rate-limits the
//! caller, persists the `Pending` record, opens the progress channel, and
//! only then publishes the envelope. Opening the channel before publishing
//! means a worker that starts immediately still has somewhere to push the
//! `running` frame.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::{JobEnvelope, MessageBroker, TaskSpec};
use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::dispatch::{Dispatcher, ToolRegistry};
use crate::error::{LimitError, Result};
use crate::job::{Job, JobStore, spawn_reaper};
use crate::limiter::RateLimiter;
use crate::notify::{CallbackSender, ProgressEvent, ProgressNotifier};
use crate::worker::{AgentModel, WorkerDeps, spawn_workers};

/// The assembled pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn JobStore>,
    broker: MessageBroker,
    limiter: RateLimiter,
    notifier: Arc<ProgressNotifier>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        broker: MessageBroker,
        limiter: RateLimiter,
        notifier: Arc<ProgressNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
            limiter,
            notifier,
        }
    }

    /// Admit and enqueue a job. Returns the job id immediately; execution
    /// happens on the worker pool.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        task: TaskSpec,
        callback_url: Option<String>,
    ) -> Result<Uuid> {
        let (job_id, _rx) = self.submit_with_progress(ctx, task, callback_url).await?;
        Ok(job_id)
    }

    /// Like `submit`, but also returns a progress subscription created
    /// before the envelope is published, so no frame can be missed.
    pub async fn submit_with_progress(
        &self,
        ctx: &RequestContext,
        task: TaskSpec,
        callback_url: Option<String>,
    ) -> Result<(Uuid, broadcast::Receiver<ProgressEvent>)> {
        if !self.limiter.allow(&ctx.identity).await {
            tracing::info!(identity = %ctx.identity, "Submission rejected by rate limit");
            return Err(LimitError::Exceeded {
                identity: ctx.identity.clone(),
            }
            .into());
        }

        let job = Job::new();
        let job_id = self.store.create(job).await?;

        // Channel first, publish second.
        let rx = self.notifier.open_channel(job_id).await;

        let mut envelope = JobEnvelope::new(job_id, task).with_identity(&ctx.identity);
        if let Some(url) = callback_url {
            envelope = envelope.with_callback(url);
        }
        self.broker
            .publish(
                &self.config.job_topic,
                &job_id.to_string(),
                envelope.to_payload(),
            )
            .await?;

        tracing::info!(job_id = %job_id, identity = %ctx.identity, "Job submitted");
        Ok((job_id, rx))
    }

    /// Fetch a job's current record.
    pub async fn job(&self, id: Uuid) -> Result<Job> {
        Ok(self.store.get(id).await?)
    }

    /// Subscribe to a job's progress stream.
    pub async fn progress(&self, id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        self.notifier.open_channel(id).await
    }

    /// Start the worker pool and the reaper. Returns the spawned handles so
    /// callers can await or abort them.
    pub async fn start(
        &self,
        registry: Arc<ToolRegistry>,
        model: Arc<dyn AgentModel>,
        callbacks: Arc<CallbackSender>,
    ) -> Vec<JoinHandle<()>> {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            self.config.call_timeout,
        ));
        let deps = WorkerDeps {
            store: Arc::clone(&self.store),
            registry,
            dispatcher,
            model,
            notifier: Arc::clone(&self.notifier),
            callbacks,
            max_iterations: self.config.max_iterations,
        };

        let mut handles = spawn_workers(
            self.config.worker_count,
            deps,
            &self.broker,
            &self.config.job_topic,
            &self.config.consumer_group,
        )
        .await;

        handles.push(spawn_reaper(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            self.config.stuck_threshold,
            self.config.reaper_interval,
        ));

        tracing::info!(
            workers = self.config.worker_count,
            topic = %self.config.job_topic,
            "Pipeline started"
        );
        handles
    }
}
