//! Progress reports and job update messages.
//!
//! A `ProgressReport` is the throttled, externally visible unit derived
//! from raw position samples. `JobUpdate` is the envelope delivered to a
//! notification sink: the report stream plus exactly one terminal message.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timestamp::format_seconds;

/// A throttled progress update for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    /// Completion percentage, clamped to 0.0-100.0. Omitted when the
    /// source duration (or transfer size) is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,

    /// Position in seconds for transcode jobs. Advisory, never authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_secs: Option<f64>,

    /// Estimated seconds remaining. Advisory, derived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,

    /// True when emitted due to elapsed time with no new sample,
    /// carrying the last known percent unchanged.
    #[serde(default)]
    pub is_heartbeat: bool,

    /// Wall-clock receipt time of the underlying sample.
    pub observed_at: DateTime<Utc>,
}

impl ProgressReport {
    /// Format the ETA as `HH:MM:SS`, if known.
    pub fn eta_text(&self) -> Option<String> {
        self.eta_secs.map(format_seconds)
    }
}

/// Message delivered to a notification sink for one job.
///
/// Exactly one terminal variant (`Succeeded`, `Failed`, or `Cancelled`)
/// is delivered per job, after all resources are released; no `Progress`
/// message follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobUpdate {
    /// Throttled progress report
    Progress(ProgressReport),

    /// Conversion finished, output available
    Succeeded {
        #[serde(rename = "outputPath")]
        output_path: String,
    },

    /// Conversion failed
    Failed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Conversion cancelled by external request
    Cancelled,
}

impl JobUpdate {
    /// Check whether this update ends the job's stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobUpdate::Progress(_))
    }
}
