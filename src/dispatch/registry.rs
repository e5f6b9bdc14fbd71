//! Capability registry — an explicit mapping from call name to handler,
//! populated at startup. The dispatcher has no runtime discovery step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::context::RequestContext;
use crate::dispatch::call::terminal_kind;
use crate::error::DispatchError;

/// A capability handler. Implementations decode their own typed arguments
/// from the untyped payload; a decode failure is an `InvalidArguments`
/// error scoped to that one invocation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Capability name routed on by the dispatcher.
    fn name(&self) -> &str;

    /// Description surfaced to the agent model.
    fn description(&self) -> &str;

    /// JSON schema of the arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute with the explicit request context.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, DispatchError>;
}

/// Tool definition handed to the agent model for function calling.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Registry of available capabilities.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a capability. Terminal call names are reserved: they are
    /// filtered by the dispatcher and must never gain a handler.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if terminal_kind(&name).is_some() {
            tracing::warn!(
                tool = %name,
                "Rejected registration: name is reserved for a terminal call"
            );
            return;
        }
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Get a capability by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Check if a capability exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// List all capability names.
    pub async fn list(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Number of registered capabilities.
    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Definitions for the agent model's function-calling interface.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract a required string argument.
pub fn require_str<'a>(
    arguments: &'a serde_json::Value,
    tool: &str,
    key: &str,
) -> Result<&'a str, DispatchError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::InvalidArguments {
            name: tool.to_string(),
            reason: format!("missing required string argument '{key}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "a mock tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &RequestContext,
        ) -> Result<serde_json::Value, DispatchError> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool {
                name: "test_tool".to_string(),
            }))
            .await;

        assert!(registry.has("test_tool").await);
        assert!(!registry.has("nonexistent").await);
        assert_eq!(registry.get("test_tool").await.unwrap().name(), "test_tool");
    }

    #[tokio::test]
    async fn terminal_names_cannot_be_registered() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool {
                name: "sendMessageToUser".to_string(),
            }))
            .await;

        assert!(!registry.has("sendMessageToUser").await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn definitions_expose_schema() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(MockTool {
                name: "my_tool".to_string(),
            }))
            .await;

        let defs = registry.definitions().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "my_tool");
        assert_eq!(defs[0].parameters["type"], "object");
    }

    #[test]
    fn require_str_reports_missing_key() {
        let args = serde_json::json!({"other": 1});
        let err = require_str(&args, "t", "message").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArguments { .. }));
    }
}
