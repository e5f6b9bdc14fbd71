//! Job worker — consumes deliveries, claims jobs via compare-and-set, runs
//! the task, and settles the delivery.
//!
//! The claim is the idempotency point: only the worker that wins the
//! `Pending -> Running` transition executes the job. A redelivered message
//! for an already-claimed job loses the compare-and-set and is acknowledged
//! without side effects.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::channel::{Delivery, JobEnvelope, MessageBody, MessageBroker, Subscription, TaskSpec};
use crate::context::RequestContext;
use crate::dispatch::{Dispatcher, TerminalKind, ToolRegistry};
use crate::error::{Error, JobError, StoreError};
use crate::job::{JobStatus, JobStore};
use crate::notify::{CallbackPayload, CallbackSender, ProgressEvent, ProgressNotifier};
use crate::worker::agent::{AgentModel, TranscriptEntry, TurnRequest};

const SYSTEM_FRAMING: &str = "You are an automation agent working on a single job. \
     Use the available tools to carry it out. When the user needs a reply, call \
     sendMessageToUser with the final message; if nothing needs doing, call \
     noActionNeeded.";

/// Everything a worker needs, shared across the pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub model: Arc<dyn AgentModel>,
    pub notifier: Arc<ProgressNotifier>,
    pub callbacks: Arc<CallbackSender>,
    /// Upper bound on agent-loop iterations per job.
    pub max_iterations: u32,
}

/// One worker in the consumer group.
pub struct JobWorker {
    deps: WorkerDeps,
}

impl JobWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }

    /// Drain the subscription until the broker goes away.
    pub async fn run(self, mut subscription: Subscription) {
        while let Some(delivery) = subscription.recv().await {
            self.handle(delivery).await;
        }
        tracing::debug!("Worker subscription closed, shutting down");
    }

    /// Process one delivery end to end.
    pub async fn handle(&self, delivery: Delivery) {
        let envelope = match JobEnvelope::from_payload(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed payloads can never succeed; redelivering them
                // would only churn until dead-letter.
                tracing::error!(
                    topic = %delivery.topic,
                    error = %e,
                    "Discarding malformed job envelope"
                );
                delivery.ack();
                return;
            }
        };
        let job_id = envelope.job_id;

        // Claim the job. Losing the compare-and-set means another delivery
        // of the same message already won; this one is a duplicate.
        match self
            .deps
            .store
            .transition(job_id, JobStatus::Pending, JobStatus::Running, None)
            .await
        {
            Ok(_) => {}
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(
                    job_id = %job_id,
                    attempt = delivery.attempt,
                    "Duplicate delivery, job already claimed"
                );
                delivery.ack();
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Claim failed, leaving delivery for retry");
                delivery.nack();
                return;
            }
        }

        tracing::info!(job_id = %job_id, attempt = delivery.attempt, "Job started");
        self.deps
            .notifier
            .push(job_id, ProgressEvent::Running { job_id })
            .await;

        let ctx = self.request_context(&envelope);
        let outcome = self.execute(job_id, &ctx, &envelope.task).await;
        self.settle(job_id, &ctx, envelope.callback_url.as_deref(), outcome)
            .await;

        // The channel must not outlive the job, whatever happened above.
        self.deps.notifier.complete(job_id).await;

        delivery.ack();
    }

    fn request_context(&self, envelope: &JobEnvelope) -> RequestContext {
        let mut ctx = RequestContext::new(envelope.identity.as_deref().unwrap_or("anonymous"));
        ctx.request_id = envelope.job_id;
        if let TaskSpec::Agent {
            correlation_id: Some(correlation_id),
            ..
        } = &envelope.task
        {
            ctx.correlation_id = Some(correlation_id.clone());
        }
        ctx
    }

    async fn execute(
        &self,
        job_id: Uuid,
        ctx: &RequestContext,
        task: &TaskSpec,
    ) -> Result<String, Error> {
        match task {
            TaskSpec::Message { body } => Ok(body.render()?),
            TaskSpec::Agent { model, body, .. } => {
                self.agent_loop(job_id, ctx, model.clone(), body).await
            }
        }
    }

    /// Drive the model/tool loop until a terminal call, an empty turn, or
    /// the iteration cap.
    async fn agent_loop(
        &self,
        job_id: Uuid,
        ctx: &RequestContext,
        model: Option<String>,
        body: &MessageBody,
    ) -> Result<String, Error> {
        let instruction = body.render()?;
        let mut transcript = vec![
            TranscriptEntry::System(SYSTEM_FRAMING.to_string()),
            TranscriptEntry::User(instruction),
        ];
        let tools = self.deps.registry.definitions().await;

        for iteration in 1..=self.deps.max_iterations {
            let request = TurnRequest {
                model: model.clone(),
                transcript: transcript.clone(),
                tools: tools.clone(),
            };
            let calls = self.deps.model.next_turn(&request).await?;

            if calls.is_empty() {
                tracing::debug!(job_id = %job_id, iteration, "Model produced no calls, treating as done");
                return Ok("no further action required".to_string());
            }

            self.deps
                .notifier
                .push(
                    job_id,
                    ProgressEvent::Milestone {
                        job_id,
                        label: "tool_batch".to_string(),
                        detail: json!({ "iteration": iteration, "calls": calls.len() }),
                    },
                )
                .await;

            let batch = self.deps.dispatcher.execute_batch(&calls, ctx).await;

            match batch.terminal {
                Some(TerminalKind::Passthrough) => {
                    // Last response carries the passthrough payload.
                    let result = batch
                        .responses
                        .last()
                        .and_then(|r| r.result.get("message"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            batch
                                .responses
                                .last()
                                .map(|r| r.result.to_string())
                                .unwrap_or_default()
                        });
                    return Ok(result);
                }
                Some(TerminalKind::Silent) => {
                    return Ok("no action needed".to_string());
                }
                None => {
                    transcript.push(TranscriptEntry::ToolResponses(batch.responses));
                }
            }
        }

        Err(JobError::IterationLimit {
            id: job_id,
            max: self.deps.max_iterations,
        }
        .into())
    }

    /// Record the terminal state, notify subscribers, and fire the callback.
    async fn settle(
        &self,
        job_id: Uuid,
        ctx: &RequestContext,
        callback_url: Option<&str>,
        outcome: Result<String, Error>,
    ) {
        match outcome {
            Ok(result) => {
                match self
                    .deps
                    .store
                    .transition(
                        job_id,
                        JobStatus::Running,
                        JobStatus::Completed,
                        Some(result.clone()),
                    )
                    .await
                {
                    Ok(_) => {
                        tracing::info!(job_id = %job_id, "Job completed");
                        self.deps
                            .notifier
                            .push(
                                job_id,
                                ProgressEvent::Completed {
                                    job_id,
                                    result: result.clone(),
                                },
                            )
                            .await;
                        if let Some(url) = callback_url {
                            self.deps.callbacks.send_detached(
                                url.to_string(),
                                CallbackPayload::success(
                                    ctx.request_id,
                                    json!({ "result": result }),
                                ),
                            );
                        }
                    }
                    // The reaper (or a racing settle) got there first.
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Completion transition lost");
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                match self
                    .deps
                    .store
                    .transition(
                        job_id,
                        JobStatus::Running,
                        JobStatus::Failed,
                        Some(message.clone()),
                    )
                    .await
                {
                    Ok(_) => {
                        tracing::warn!(job_id = %job_id, error = %message, "Job failed");
                        self.deps
                            .notifier
                            .push(
                                job_id,
                                ProgressEvent::Error {
                                    job_id,
                                    message: message.clone(),
                                },
                            )
                            .await;
                        if let Some(url) = callback_url {
                            self.deps.callbacks.send_detached(
                                url.to_string(),
                                CallbackPayload::failure(ctx.request_id, message),
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Failure transition lost");
                    }
                }
            }
        }
    }
}

/// Spawn a pool of workers sharing one consumer group.
pub async fn spawn_workers(
    count: usize,
    deps: WorkerDeps,
    broker: &MessageBroker,
    topic: &str,
    group: &str,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let subscription = broker.subscribe(topic, group).await;
        let worker = JobWorker::new(deps.clone());
        handles.push(tokio::spawn(worker.run(subscription)));
    }
    handles
}
