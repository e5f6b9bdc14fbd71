//! Job submission envelope — the wire format published to the job topic.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;

static TEMPLATE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid template regex"));

/// Message body: either a plain message or a template plus variable map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Template {
        template: String,
        #[serde(default)]
        variables: HashMap<String, String>,
    },
    Plain {
        message: String,
    },
}

impl MessageBody {
    /// Create a plain body.
    pub fn plain(message: impl Into<String>) -> Self {
        Self::Plain {
            message: message.into(),
        }
    }

    /// Render the body to its final text. Template bodies substitute
    /// `{{variable}}` placeholders; an unbound placeholder is a validation
    /// error, never silently left in place.
    pub fn render(&self) -> Result<String, ChannelError> {
        match self {
            Self::Plain { message } => Ok(message.clone()),
            Self::Template {
                template,
                variables,
            } => {
                let mut missing = Vec::new();
                let rendered = TEMPLATE_VAR.replace_all(template, |caps: &regex::Captures| {
                    let name = &caps[1];
                    match variables.get(name) {
                        Some(value) => value.clone(),
                        None => {
                            missing.push(name.to_string());
                            String::new()
                        }
                    }
                });
                if missing.is_empty() {
                    Ok(rendered.into_owned())
                } else {
                    Err(ChannelError::RenderFailed(format!(
                        "unbound template variables: {}",
                        missing.join(", ")
                    )))
                }
            }
        }
    }
}

/// Task-specific payload inside the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "task_payload", rename_all = "snake_case")]
pub enum TaskSpec {
    /// Single unit of work: render the body and complete.
    Message {
        #[serde(flatten)]
        body: MessageBody,
    },
    /// Agent-loop task: the model drives tool calls until a terminal call.
    Agent {
        /// Model identifier, if the caller pins one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Correlation id for grouping related jobs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        #[serde(flatten)]
        body: MessageBody,
    },
}

/// Envelope published to the job topic, keyed by `job_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub task: TaskSpec,
    /// Identity of the submitter, carried so workers can rebuild the
    /// request context without any ambient state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Optional fire-and-forget callback URL for terminal notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl JobEnvelope {
    /// Create an envelope for a job.
    pub fn new(job_id: Uuid, task: TaskSpec) -> Self {
        Self {
            job_id,
            task,
            identity: None,
            callback_url: None,
        }
    }

    /// Attach the submitter's identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Attach a callback URL.
    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Decode an envelope from a published payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, ChannelError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| ChannelError::InvalidEnvelope(e.to_string()))
    }

    /// Encode for publishing.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("envelope serializes")
    }
}
