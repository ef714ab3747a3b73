//! Conversion job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::OutputProfile;

/// Unique identifier for a conversion job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversion job state.
///
/// Transitions are one-directional:
/// `Queued -> Probing -> Running -> Succeeded | Failed | Cancelled`.
/// No state is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job accepted, not yet started
    #[default]
    Queued,
    /// Determining source duration
    Probing,
    /// Transcoder process active
    Running,
    /// Transcoder exited with code 0
    Succeeded,
    /// Transcoder failed, could not be started, or an internal error occurred
    Failed,
    /// Externally cancelled
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Probing => "probing",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single end-to-end conversion request.
///
/// Created when a request is accepted; its temp artifacts are released
/// when the job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConversionJob {
    /// Unique job ID
    pub id: JobId,

    /// Source media location
    pub input_path: PathBuf,

    /// Destination media location
    pub output_path: PathBuf,

    /// Selected output profile
    pub profile: OutputProfile,

    /// Total source duration in seconds; `None` when probing failed,
    /// in which case progress degrades to heartbeats without percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_secs: Option<f64>,

    /// Current state
    #[serde(default)]
    pub state: JobState,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When processing started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When a terminal state was reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure detail (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ConversionJob {
    /// Create a new queued job.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        profile: OutputProfile,
    ) -> Self {
        Self {
            id: JobId::new(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            profile,
            total_duration_secs: None,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    /// Enter the probing state.
    pub fn start_probing(mut self) -> Self {
        debug_assert_eq!(self.state, JobState::Queued);
        self.state = JobState::Probing;
        self.started_at = Some(Utc::now());
        self
    }

    /// Enter the running state, recording the probe result if any.
    pub fn begin_running(mut self, total_duration_secs: Option<f64>) -> Self {
        debug_assert_eq!(self.state, JobState::Probing);
        self.total_duration_secs = total_duration_secs;
        self.state = JobState::Running;
        self
    }

    /// Mark the job as succeeded.
    pub fn succeed(mut self) -> Self {
        self.state = JobState::Succeeded;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Mark the job as failed.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.state = JobState::Failed;
        self.error_message = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }

    /// Mark the job as cancelled. Distinct from failure.
    pub fn cancel(mut self) -> Self {
        self.state = JobState::Cancelled;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
