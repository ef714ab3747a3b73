//! Webhook notification sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use vconv_models::{JobId, JobUpdate};

use crate::error::{NotifyError, NotifyResult};
use crate::sink::NotificationSink;

/// Fallback delay when a 429 arrives without a usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Posts job updates as JSON to an HTTP endpoint.
///
/// HTTP 429 is translated into [`NotifyError::RateLimited`] carrying the
/// server's `Retry-After` value so the dispatcher can honor it.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Use a preconfigured client (timeouts, proxies).
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, job_id: &JobId, update: &JobUpdate) -> NotifyResult<()> {
        let payload = json!({
            "jobId": job_id,
            "update": update,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(NotifyError::rate_limited(retry_after));
        }

        if !status.is_success() {
            return Err(NotifyError::Endpoint {
                status: status.as_u16(),
            });
        }

        debug!(job_id = %job_id, "Delivered update to {}", self.endpoint);
        Ok(())
    }
}
