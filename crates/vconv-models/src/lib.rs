//! Shared data models for the vconv conversion service.
//!
//! This crate provides Serde-serializable types for:
//! - Conversion jobs and their state machine
//! - Output encoding profiles
//! - Progress reports and job update messages
//! - Timestamp parsing helpers

pub mod job;
pub mod profile;
pub mod report;
pub mod timestamp;

// Re-export common types
pub use job::{ConversionJob, JobId, JobState};
pub use profile::{OutputProfile, ProfileParseError};
pub use report::{JobUpdate, ProgressReport};
pub use timestamp::{format_seconds, parse_timestamp, TimestampError};
