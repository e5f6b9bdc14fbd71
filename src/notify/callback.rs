//! Outbound callback notifications for fire-and-forget integrations.
//!
//! Delivery failures are logged, never retried; retry is a possible future
//! enhancement, not a guarantee this core makes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CallbackError;

/// Default timeout for callback delivery.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload POSTed to a caller-supplied URL on job completion.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub request_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl CallbackPayload {
    /// Build a success payload.
    pub fn success(request_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            request_id,
            success: true,
            error: None,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Build a failure payload.
    pub fn failure(request_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }
}

/// HTTP sender for callback notifications.
pub struct CallbackSender {
    client: reqwest::Client,
    /// Optional bearer token attached to every callback request.
    auth_token: Option<SecretString>,
}

impl CallbackSender {
    /// Create a sender, optionally with a bearer token.
    pub fn new(auth_token: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(CALLBACK_TIMEOUT)
                .build()
                .unwrap_or_default(),
            auth_token,
        }
    }

    /// Deliver a callback once.
    pub async fn send(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallbackError::DeliveryFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CallbackError::BadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    /// Fire-and-forget delivery: spawn, log on failure, move on.
    pub fn send_detached(self: &Arc<Self>, url: String, payload: CallbackPayload) {
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = sender.send(&url, &payload).await {
                tracing::warn!(
                    request_id = %payload.request_id,
                    error = %e,
                    "Callback delivery failed (not retried)"
                );
            }
        });
    }
}
