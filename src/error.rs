//! Error types for the conveyor pipeline.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Rate limit error: {0}")]
    Limit(#[from] LimitError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),
}

/// Job record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Job {id} already exists")]
    AlreadyExists { id: Uuid },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Message channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid message envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Template render failed: {0}")]
    RenderFailed(String),
}

/// Tool dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Malformed tool-call batch: {0}")]
    MalformedBatch(String),
}

/// Agent model (LLM collaborator) errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid model response: {reason}")]
    InvalidResponse { reason: String },
}

/// Rate limiter errors.
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// 429-equivalent rejection with a machine-readable reason.
    #[error("rate_limit_exceeded: identity {identity} over limit for current window")]
    Exceeded { identity: String },

    #[error("Counter store error: {0}")]
    Backend(String),
}

/// Job execution errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} exceeded maximum iterations ({max})")]
    IterationLimit { id: Uuid, max: u32 },
}

/// Callback delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Callback to {url} failed: {reason}")]
    DeliveryFailed { url: String, reason: String },

    #[error("Callback to {url} returned status {status}")]
    BadStatus { url: String, status: u16 },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
