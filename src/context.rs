//! Request context — explicit per-request state threaded through the
//! worker → dispatcher → handler chain.
//!
//! This replaces ambient thread-local "current user" state: every handler
//! receives the context as a parameter, which keeps concurrent workers safe.

use serde::Serialize;
use uuid::Uuid;

/// Context for one admitted request, carried alongside the job.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    /// Unique request id (also used for callback correlation).
    pub request_id: Uuid,
    /// Caller identity (rate-limit key, audit trail).
    pub identity: String,
    /// Correlation id for grouping related jobs, if any.
    pub correlation_id: Option<String>,
    /// Free-form metadata attached at admission.
    pub metadata: serde_json::Value,
}

impl RequestContext {
    /// Create a new context for a caller identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            identity: identity.into(),
            correlation_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("anonymous")
    }
}
