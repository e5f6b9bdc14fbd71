//! Message composition capability.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::channel::MessageBody;
use crate::context::RequestContext;
use crate::dispatch::registry::Tool;
use crate::error::DispatchError;

/// Typed arguments for `compose_message`.
#[derive(Debug, Deserialize)]
struct ComposeArgs {
    template: String,
    #[serde(default)]
    variables: HashMap<String, String>,
}

/// Renders a template plus variable map into a final message.
pub struct ComposeMessageTool;

#[async_trait]
impl Tool for ComposeMessageTool {
    fn name(&self) -> &str {
        "compose_message"
    }

    fn description(&self) -> &str {
        "Render a message template, substituting {{variable}} placeholders \
         from the supplied variable map. Fails if any placeholder is unbound."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "template": {
                    "type": "string",
                    "description": "Message template with {{variable}} placeholders"
                },
                "variables": {
                    "type": "object",
                    "description": "Placeholder name to value map",
                    "additionalProperties": { "type": "string" }
                }
            },
            "required": ["template"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &RequestContext,
    ) -> Result<serde_json::Value, DispatchError> {
        let args: ComposeArgs =
            serde_json::from_value(arguments).map_err(|e| DispatchError::InvalidArguments {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let body = MessageBody::Template {
            template: args.template,
            variables: args.variables,
        };
        let message = body
            .render()
            .map_err(|e| DispatchError::ExecutionFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({ "message": message }))
    }
}
