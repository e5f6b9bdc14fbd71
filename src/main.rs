use std::sync::Arc;
use std::time::Duration;

use conveyor::channel::{BrokerConfig, MessageBody, MessageBroker, TaskSpec};
use conveyor::config::PipelineConfig;
use conveyor::context::RequestContext;
use conveyor::dispatch::builtin::ComposeMessageTool;
use conveyor::dispatch::{ToolCall, ToolRegistry};
use conveyor::error::ModelError;
use conveyor::job::MemoryJobStore;
use conveyor::limiter::{MemoryCounterStore, RateLimiter};
use conveyor::notify::{CallbackSender, ProgressNotifier};
use conveyor::pipeline::Pipeline;
use conveyor::worker::{AgentModel, TranscriptEntry, TurnRequest};

/// Demo model: composes a greeting, then hands the rendered message back to
/// the user. Stands in for a real LLM backend so the pipeline can be run
/// end to end without credentials.
struct DemoModel;

#[async_trait::async_trait]
impl AgentModel for DemoModel {
    async fn next_turn(&self, request: &TurnRequest) -> Result<Vec<ToolCall>, ModelError> {
        let composed = request.transcript.iter().rev().find_map(|entry| {
            if let TranscriptEntry::ToolResponses(responses) = entry {
                responses
                    .iter()
                    .find_map(|r| r.result.get("message").and_then(|m| m.as_str()))
                    .map(str::to_string)
            } else {
                None
            }
        });

        match composed {
            Some(message) => Ok(vec![ToolCall {
                id: "2".to_string(),
                name: "sendMessageToUser".to_string(),
                arguments: serde_json::json!({ "message": message }),
            }]),
            None => Ok(vec![ToolCall {
                id: "1".to_string(),
                name: "compose_message".to_string(),
                arguments: serde_json::json!({
                    "template": "Hello {{name}}, your pipeline is up.",
                    "variables": { "name": "operator" }
                }),
            }]),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = PipelineConfig::default();
    config.worker_count = env_parse("CONVEYOR_WORKERS", config.worker_count);
    config.max_iterations = env_parse("CONVEYOR_MAX_ITERATIONS", config.max_iterations);
    config.rate_limit = env_parse("CONVEYOR_RATE_LIMIT", config.rate_limit);
    config.stuck_threshold = Duration::from_secs(env_parse(
        "CONVEYOR_STUCK_SECS",
        config.stuck_threshold.as_secs(),
    ));

    eprintln!("⚙ Conveyor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.worker_count);
    eprintln!(
        "   Topic: {} (group {})",
        config.job_topic, config.consumer_group
    );
    eprintln!(
        "   Rate limit: {}/{}s",
        config.rate_limit,
        config.rate_window.as_secs()
    );
    eprintln!("   Max iterations: {}\n", config.max_iterations);

    let store = Arc::new(MemoryJobStore::new());
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
    let notifier = Arc::new(ProgressNotifier::new());

    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(ComposeMessageTool)).await;
    eprintln!("   Tools: {} registered", registry.count().await);

    let callback_token = std::env::var("CONVEYOR_CALLBACK_TOKEN")
        .ok()
        .map(secrecy::SecretString::from);
    let callbacks = Arc::new(CallbackSender::new(callback_token));

    let pipeline = Pipeline::new(config, store, broker, limiter, notifier);
    let _handles = pipeline
        .start(registry, Arc::new(DemoModel), callbacks)
        .await;

    // Submit one agent job and stream its progress to the console.
    let ctx = RequestContext::new("operator");
    let (job_id, mut progress) = pipeline
        .submit_with_progress(
            &ctx,
            TaskSpec::Agent {
                model: None,
                correlation_id: None,
                body: MessageBody::plain("Greet the operator."),
            },
            None,
        )
        .await?;

    while let Ok(event) = progress.recv().await {
        eprintln!("   {}", serde_json::to_string(&event)?);
        if event.is_terminal() {
            break;
        }
    }

    let job = pipeline.job(job_id).await?;
    eprintln!("\n   Job {} finished: {}", job.id, job.status);
    if let Some(result) = job.result {
        eprintln!("   Result: {result}");
    }

    Ok(())
}
