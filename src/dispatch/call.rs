//! Tool-call wire types and dispatch outcomes.

use serde::{Deserialize, Serialize};

/// A structured function invocation requested by the agent model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id supplied by the calling agent turn.
    pub id: String,
    /// Capability identifier.
    pub name: String,
    /// JSON-compatible argument payload, typed per capability.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Result of one tool call, echoing the call's correlation id and name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub result: serde_json::Value,
}

impl ToolResponse {
    /// Successful response.
    pub fn ok(call: &ToolCall, result: serde_json::Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            result,
        }
    }

    /// Error response. The error stays scoped to this call; it never fails
    /// the batch.
    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            result: serde_json::json!({ "error": message.into() }),
        }
    }

    /// Check if this response carries an error payload.
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// How a terminal call ends the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// Ends the loop and surfaces its payload to the caller.
    Passthrough,
    /// Ends the loop silently; no response is produced.
    Silent,
}

/// Terminal call names. These stop the agent loop and are never executed as
/// side-effecting actions; no handler may be registered under them.
const TERMINAL_CALLS: &[(&str, TerminalKind)] = &[
    ("sendMessageToUser", TerminalKind::Passthrough),
    ("noActionNeeded", TerminalKind::Silent),
];

/// Look up whether a call name is terminal.
pub fn terminal_kind(name: &str) -> Option<TerminalKind> {
    TERMINAL_CALLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// Outcome of dispatching a single call. The terminal/error distinction is
/// part of the type rather than signalled by exceptions.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// A handler ran (successfully or not); the response carries the result
    /// or an error payload.
    Executed(ToolResponse),
    /// Terminal call that still surfaces a payload to the caller.
    Passthrough(ToolResponse),
    /// Terminal call with nothing to surface.
    Silenced,
}

/// Outcome of a batch: collected responses plus whether a terminal call
/// halted processing.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub responses: Vec<ToolResponse>,
    pub terminal: Option<TerminalKind>,
}

impl BatchOutcome {
    /// Check if a terminal call ended the batch.
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_table() {
        assert_eq!(
            terminal_kind("sendMessageToUser"),
            Some(TerminalKind::Passthrough)
        );
        assert_eq!(terminal_kind("noActionNeeded"), Some(TerminalKind::Silent));
        assert_eq!(terminal_kind("compose_message"), None);
    }

    #[test]
    fn response_echoes_call() {
        let call = ToolCall {
            id: "1".to_string(),
            name: "compose_message".to_string(),
            arguments: serde_json::json!({}),
        };
        let response = ToolResponse::ok(&call, serde_json::json!({"message": "hi"}));
        assert_eq!(response.id, "1");
        assert_eq!(response.name, "compose_message");
        assert!(!response.is_error());
    }

    #[test]
    fn error_response_is_flagged() {
        let call = ToolCall {
            id: "1".to_string(),
            name: "x".to_string(),
            arguments: serde_json::Value::Null,
        };
        assert!(ToolResponse::error(&call, "nope").is_error());
    }

    #[test]
    fn call_deserializes_without_arguments() {
        let call: ToolCall = serde_json::from_str(r#"{"id":"1","name":"t"}"#).unwrap();
        assert!(call.arguments.is_null());
    }
}
