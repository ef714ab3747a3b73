//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Intake failed: {0}")]
    IntakeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn intake_failed(msg: impl Into<String>) -> Self {
        Self::IntakeFailed(msg.into())
    }
}
