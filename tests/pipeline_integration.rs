//! End-to-end pipeline tests: submission through worker execution to
//! terminal state, progress streaming, redelivery, and rate limiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::time::timeout;

use conveyor::channel::{BrokerConfig, MessageBody, MessageBroker, TaskSpec};
use conveyor::config::PipelineConfig;
use conveyor::context::RequestContext;
use conveyor::dispatch::{Tool, ToolCall, ToolRegistry};
use conveyor::error::{DispatchError, Error, LimitError, ModelError};
use conveyor::job::{JobStatus, JobStore, MemoryJobStore};
use conveyor::limiter::{MemoryCounterStore, RateLimiter};
use conveyor::notify::{CallbackSender, ProgressEvent, ProgressNotifier};
use conveyor::pipeline::Pipeline;
use conveyor::worker::{AgentModel, TurnRequest};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Plays a fixed script of turns, then empty batches forever.
struct ScriptedModel {
    turns: tokio::sync::Mutex<Vec<Vec<ToolCall>>>,
}

impl ScriptedModel {
    fn new(turns: Vec<Vec<ToolCall>>) -> Self {
        Self {
            turns: tokio::sync::Mutex::new(turns),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl AgentModel for ScriptedModel {
    async fn next_turn(&self, _request: &TurnRequest) -> Result<Vec<ToolCall>, ModelError> {
        let mut turns = self.turns.lock().await;
        if turns.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(turns.remove(0))
        }
    }
}

struct CountingTool {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "work"
    }
    fn description(&self) -> &str {
        "records an invocation"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &RequestContext,
    ) -> Result<serde_json::Value, DispatchError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"ok": true}))
    }
}

fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

struct Harness {
    pipeline: Pipeline,
    invocations: Arc<AtomicUsize>,
}

/// Build a running pipeline with one counting tool and the given model.
async fn start_pipeline(model: Arc<dyn AgentModel>, rate_limit: u64) -> Harness {
    let config = PipelineConfig {
        worker_count: 2,
        rate_limit,
        ..PipelineConfig::default()
    };
    let broker = MessageBroker::new(BrokerConfig {
        max_attempts: config.max_delivery_attempts,
        visibility_timeout: config.visibility_timeout,
        redelivery_backoff: config.redelivery_backoff,
    });
    let limiter = RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        config.rate_limit,
        config.rate_window,
    );
    let registry = Arc::new(ToolRegistry::new());
    let invocations = Arc::new(AtomicUsize::new(0));
    registry
        .register(Arc::new(CountingTool {
            invocations: Arc::clone(&invocations),
        }))
        .await;

    let pipeline = Pipeline::new(
        config,
        Arc::new(MemoryJobStore::new()),
        broker,
        limiter,
        Arc::new(ProgressNotifier::new()),
    );
    pipeline
        .start(registry, model, Arc::new(CallbackSender::new(None)))
        .await;

    Harness {
        pipeline,
        invocations,
    }
}

async fn wait_terminal(pipeline: &Pipeline, id: uuid::Uuid) -> conveyor::job::Job {
    timeout(TEST_TIMEOUT, async {
        loop {
            let job = pipeline.job(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time")
}

#[tokio::test]
async fn message_job_completes_end_to_end() {
    let harness = start_pipeline(Arc::new(ScriptedModel::empty()), 20).await;
    let ctx = RequestContext::new("caller");

    let id = harness
        .pipeline
        .submit(
            &ctx,
            TaskSpec::Message {
                body: MessageBody::Template {
                    template: "Hello {{name}}".to_string(),
                    variables: std::collections::HashMap::from([(
                        "name".to_string(),
                        "Ada".to_string(),
                    )]),
                },
            },
            None,
        )
        .await
        .unwrap();

    let job = wait_terminal(&harness.pipeline, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.as_deref(), Some("Hello Ada"));
}

#[tokio::test]
async fn agent_job_runs_tools_until_terminal_call() {
    let model = Arc::new(ScriptedModel::new(vec![
        vec![call("1", "work", json!({}))],
        vec![call("2", "work", json!({}))],
        vec![call("3", "sendMessageToUser", json!({"message": "all done"}))],
    ]));
    let harness = start_pipeline(model, 20).await;
    let ctx = RequestContext::new("caller");

    let id = harness
        .pipeline
        .submit(
            &ctx,
            TaskSpec::Agent {
                model: None,
                correlation_id: Some("thread-1".to_string()),
                body: MessageBody::plain("do the work"),
            },
            None,
        )
        .await
        .unwrap();

    let job = wait_terminal(&harness.pipeline, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.as_deref(), Some("all done"));
    assert_eq!(harness.invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unbound_template_variable_fails_the_job() {
    let harness = start_pipeline(Arc::new(ScriptedModel::empty()), 20).await;
    let ctx = RequestContext::new("caller");

    let id = harness
        .pipeline
        .submit(
            &ctx,
            TaskSpec::Message {
                body: MessageBody::Template {
                    template: "Hello {{name}}".to_string(),
                    variables: std::collections::HashMap::new(),
                },
            },
            None,
        )
        .await
        .unwrap();

    let job = wait_terminal(&harness.pipeline, id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.unwrap().contains("name"));
}

#[tokio::test]
async fn progress_stream_delivers_running_then_terminal() {
    let harness = start_pipeline(Arc::new(ScriptedModel::empty()), 20).await;
    let ctx = RequestContext::new("caller");

    let (_id, mut rx) = harness
        .pipeline
        .submit_with_progress(
            &ctx,
            TaskSpec::Message {
                body: MessageBody::plain("hi"),
            },
            None,
        )
        .await
        .unwrap();

    let mut events = Vec::new();
    timeout(TEST_TIMEOUT, async {
        while let Ok(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("progress stream stalled");

    assert!(matches!(events.first(), Some(ProgressEvent::Running { .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Completed { .. })
    ));
}

#[tokio::test]
async fn notifier_stream_interface_ends_after_terminal() {
    // Same flow through the Stream wrapper, as a long-lived consumer uses it.
    let harness = start_pipeline(Arc::new(ScriptedModel::empty()), 20).await;
    let ctx = RequestContext::new("caller");

    let (_id, mut stream) = harness
        .pipeline
        .submit_with_progress(
            &ctx,
            TaskSpec::Message {
                body: MessageBody::plain("hi"),
            },
            None,
        )
        .await
        .unwrap();

    let mut saw_terminal = false;
    timeout(TEST_TIMEOUT, async {
        while let Ok(event) = stream.recv().await {
            if event.is_terminal() {
                saw_terminal = true;
            }
        }
    })
    .await
    .expect("stream never closed");
    assert!(saw_terminal);
}

#[tokio::test]
async fn failed_job_emits_exactly_one_error_event_then_closes() {
    let harness = start_pipeline(Arc::new(ScriptedModel::empty()), 20).await;
    let ctx = RequestContext::new("caller");

    let (id, mut rx) = harness
        .pipeline
        .submit_with_progress(
            &ctx,
            TaskSpec::Message {
                body: MessageBody::Template {
                    template: "{{boom}}".to_string(),
                    variables: std::collections::HashMap::new(),
                },
            },
            None,
        )
        .await
        .unwrap();

    let mut error_events = 0;
    timeout(TEST_TIMEOUT, async {
        while let Ok(event) = rx.recv().await {
            if matches!(event, ProgressEvent::Error { .. }) {
                error_events += 1;
            }
        }
    })
    .await
    .expect("progress channel never closed");

    assert_eq!(error_events, 1);
    let job = harness.pipeline.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.unwrap().contains("boom"));
}

#[tokio::test]
async fn rate_limit_rejects_after_twenty_in_one_window() {
    let harness = start_pipeline(Arc::new(ScriptedModel::empty()), 20).await;
    let ctx = RequestContext::new("busy-caller");
    let task = || TaskSpec::Message {
        body: MessageBody::plain("hi"),
    };

    for _ in 0..20 {
        harness.pipeline.submit(&ctx, task(), None).await.unwrap();
    }
    let err = harness.pipeline.submit(&ctx, task(), None).await.unwrap_err();

    assert!(matches!(err, Error::Limit(LimitError::Exceeded { .. })));
    assert!(err.to_string().contains("rate_limit_exceeded"));

    // Another identity is unaffected.
    let other = RequestContext::new("quiet-caller");
    harness.pipeline.submit(&other, task(), None).await.unwrap();
}

#[tokio::test]
async fn same_key_messages_are_processed_in_order() {
    // Two workers, one key: per-key FIFO must serialize them.
    let broker = MessageBroker::new(BrokerConfig::default());
    let mut a = broker.subscribe("t", "g").await;
    let mut b = broker.subscribe("t", "g").await;

    for i in 0..4 {
        broker.publish("t", "key", json!({"seq": i})).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        let delivery = timeout(TEST_TIMEOUT, async {
            tokio::select! {
                Some(d) = a.recv() => d,
                Some(d) = b.recv() => d,
            }
        })
        .await
        .unwrap();
        seen.push(delivery.payload["seq"].as_u64().unwrap());
        delivery.ack();
    }

    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn exhausted_redelivery_lands_in_dead_letter_topic() {
    let broker = MessageBroker::new(BrokerConfig {
        max_attempts: 2,
        visibility_timeout: Duration::from_secs(5),
        redelivery_backoff: Duration::from_millis(10),
    });
    let mut sub = broker.subscribe("t", "g").await;
    let mut dlq = broker.subscribe("t.dlq", "auditors").await;

    broker.publish("t", "k", json!({"poison": true})).await.unwrap();

    for _ in 0..2 {
        let delivery = timeout(TEST_TIMEOUT, sub.recv()).await.unwrap().unwrap();
        delivery.nack();
    }

    let dead = timeout(TEST_TIMEOUT, dlq.recv()).await.unwrap().unwrap();
    assert_eq!(dead.topic, "t.dlq");
    assert_eq!(dead.payload["poison"], true);
}

#[tokio::test]
async fn duplicate_envelope_delivery_does_not_rerun_a_finished_job() {
    // Submit normally, wait for completion, then re-publish the same
    // envelope by hand. The worker's claim loses and the record is frozen.
    let config = PipelineConfig {
        worker_count: 1,
        ..PipelineConfig::default()
    };
    let store = Arc::new(MemoryJobStore::new());
    let broker = MessageBroker::new(BrokerConfig::default());
    let limiter = RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        config.rate_limit,
        config.rate_window,
    );
    let registry = Arc::new(ToolRegistry::new());
    let pipeline = Pipeline::new(
        config.clone(),
        store.clone(),
        broker.clone(),
        limiter,
        Arc::new(ProgressNotifier::new()),
    );
    pipeline
        .start(
            registry,
            Arc::new(ScriptedModel::empty()),
            Arc::new(CallbackSender::new(None)),
        )
        .await;

    let ctx = RequestContext::new("caller");
    let id = pipeline
        .submit(
            &ctx,
            TaskSpec::Message {
                body: MessageBody::plain("once"),
            },
            None,
        )
        .await
        .unwrap();
    let first = wait_terminal(&pipeline, id).await;

    let envelope = conveyor::channel::JobEnvelope::new(
        id,
        TaskSpec::Message {
            body: MessageBody::plain("once"),
        },
    );
    broker
        .publish(&config.job_topic, &id.to_string(), envelope.to_payload())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = store.get(id).await.unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.updated_at, first.updated_at);
    assert_eq!(second.result, first.result);
}

#[tokio::test]
async fn notifier_stream_adapter_yields_events() {
    let notifier = ProgressNotifier::new();
    let job_id = uuid::Uuid::new_v4();
    let mut stream = notifier.stream(job_id).await;

    notifier
        .push(job_id, ProgressEvent::Running { job_id })
        .await;

    let event = timeout(TEST_TIMEOUT, stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(event, ProgressEvent::Running { .. }));
}
