//! Notification sink trait and local implementations.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use vconv_models::{JobId, JobUpdate};

use crate::error::{NotifyError, NotifyResult};

/// Destination for job updates.
///
/// Implementations ship updates to wherever the requester is watching.
/// A sink may reject a delivery with [`NotifyError::RateLimited`]; the
/// dispatcher, not the conversion core, honors that signal.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, job_id: &JobId, update: &JobUpdate) -> NotifyResult<()>;
}

/// Sink that logs updates through `tracing`. Used by the CLI binary and
/// as a safe default.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, job_id: &JobId, update: &JobUpdate) -> NotifyResult<()> {
        match update {
            JobUpdate::Progress(report) => {
                let percent = report
                    .percent
                    .map(|p| format!("{:.1}%", p))
                    .unwrap_or_else(|| "?".to_string());
                info!(
                    job_id = %job_id,
                    heartbeat = report.is_heartbeat,
                    eta = report.eta_text().as_deref().unwrap_or("-"),
                    "Progress: {}", percent
                );
            }
            other => {
                info!(job_id = %job_id, "Job update: {:?}", other);
            }
        }
        Ok(())
    }
}

/// Sink that forwards updates into an mpsc channel, for embedding and
/// tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<(JobId, JobUpdate)>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<(JobId, JobUpdate)>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, job_id: &JobId, update: &JobUpdate) -> NotifyResult<()> {
        self.tx
            .send((job_id.clone(), update.clone()))
            .await
            .map_err(|_| NotifyError::Closed)
    }
}
