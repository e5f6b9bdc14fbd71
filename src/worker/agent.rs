//! Agent model collaborator — the reasoning step behind the tool loop.
//!
//! The model's own reasoning is out of scope here; the pipeline only needs
//! "given the transcript so far, which tool calls come next".

use async_trait::async_trait;

use crate::dispatch::{ToolCall, ToolDefinition, ToolResponse};
use crate::error::ModelError;

/// One entry in the agent transcript.
#[derive(Debug, Clone)]
pub enum TranscriptEntry {
    /// System framing for the task.
    System(String),
    /// The task instruction.
    User(String),
    /// Results of a dispatched tool-call batch.
    ToolResponses(Vec<ToolResponse>),
}

/// Request for the model's next turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Model identifier pinned by the caller, if any.
    pub model: Option<String>,
    /// Conversation so far.
    pub transcript: Vec<TranscriptEntry>,
    /// Tools the model may call, including terminal calls.
    pub tools: Vec<ToolDefinition>,
}

/// The language-model collaborator driving the agent loop.
///
/// Returning an empty batch means the model considers the task finished
/// without a terminal call.
#[async_trait]
pub trait AgentModel: Send + Sync {
    async fn next_turn(&self, request: &TurnRequest) -> Result<Vec<ToolCall>, ModelError>;
}
