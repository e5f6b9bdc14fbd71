//! Tool-call dispatcher — routes calls to handlers, filters terminal calls,
//! and isolates per-call failures.

use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::dispatch::call::{
    BatchOutcome, CallOutcome, TerminalKind, ToolCall, ToolResponse, terminal_kind,
};
use crate::dispatch::registry::ToolRegistry;
use crate::error::DispatchError;

/// Stateless router from call name to capability handler.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    pub fn new(registry: Arc<ToolRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    /// Dispatch one call.
    ///
    /// Terminal calls never reach a handler: passthrough calls echo their
    /// argument payload back as the response, silent calls produce nothing.
    /// Unknown names and handler failures become error responses scoped to
    /// this call.
    pub async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> CallOutcome {
        match terminal_kind(&call.name) {
            Some(TerminalKind::Passthrough) => {
                tracing::debug!(tool = %call.name, "Terminal call, passing payload through");
                return CallOutcome::Passthrough(ToolResponse::ok(call, call.arguments.clone()));
            }
            Some(TerminalKind::Silent) => {
                tracing::debug!(tool = %call.name, "Terminal call, silenced");
                return CallOutcome::Silenced;
            }
            None => {}
        }

        let Some(tool) = self.registry.get(&call.name).await else {
            let e = DispatchError::UnknownTool {
                name: call.name.clone(),
            };
            tracing::warn!(tool = %call.name, "Unknown tool requested");
            return CallOutcome::Executed(ToolResponse::error(call, e.to_string()));
        };

        tracing::debug!(
            tool = %call.name,
            request = %ctx.request_id,
            "Tool call started"
        );

        let result = tokio::time::timeout(self.call_timeout, async {
            tool.execute(call.arguments.clone(), ctx).await
        })
        .await;

        let response = match result {
            Ok(Ok(output)) => ToolResponse::ok(call, output),
            Ok(Err(e)) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                ToolResponse::error(call, e.to_string())
            }
            Err(_) => {
                let e = DispatchError::Timeout {
                    name: call.name.clone(),
                    timeout: self.call_timeout,
                };
                tracing::warn!(tool = %call.name, error = %e, "Tool call timed out");
                ToolResponse::error(call, e.to_string())
            }
        };

        CallOutcome::Executed(response)
    }

    /// Dispatch a batch in order. One call's failure never prevents the
    /// rest from being attempted; a terminal call ends the batch
    /// immediately after being handled.
    pub async fn execute_batch(&self, calls: &[ToolCall], ctx: &RequestContext) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for call in calls {
            match self.execute(call, ctx).await {
                CallOutcome::Executed(response) => outcome.responses.push(response),
                CallOutcome::Passthrough(response) => {
                    outcome.responses.push(response);
                    outcome.terminal = Some(TerminalKind::Passthrough);
                    break;
                }
                CallOutcome::Silenced => {
                    outcome.terminal = Some(TerminalKind::Silent);
                    break;
                }
            }
        }

        outcome
    }

    /// Decode a raw batch envelope and dispatch it. Malformed JSON at the
    /// envelope level aborts the whole batch with a distinguishable error,
    /// unlike a per-call argument problem.
    pub async fn execute_batch_json(
        &self,
        raw: &str,
        ctx: &RequestContext,
    ) -> Result<BatchOutcome, DispatchError> {
        let calls: Vec<ToolCall> =
            serde_json::from_str(raw).map_err(|e| DispatchError::MalformedBatch(e.to_string()))?;
        Ok(self.execute_batch(&calls, ctx).await)
    }
}
