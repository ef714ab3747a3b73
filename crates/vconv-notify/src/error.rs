//! Notification error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors a notification sink can report.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The endpoint asked us to slow down. The caller honors
    /// `retry_after` before the next attempt.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The endpoint rejected the delivery.
    #[error("Endpoint returned status {status}")]
    Endpoint { status: u16 },

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The receiving side is gone.
    #[error("Notification channel closed")]
    Closed,

    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifyError {
    /// Create a rate-limit error.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NotifyError::Closed)
    }
}
