//! Prometheus metrics for the worker.

use ::metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vconv_jobs_started_total";
    pub const JOBS_FINISHED_TOTAL: &str = "vconv_jobs_finished_total";
    pub const FFMPEG_DURATION_SECONDS: &str = "vconv_ffmpeg_duration_seconds";
    pub const BYTES_STAGED_TOTAL: &str = "vconv_bytes_staged_total";
}

/// Record a job start.
pub fn record_job_started(profile: &str) {
    let labels = [("profile", profile.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

/// Record a finished job with its terminal state.
pub fn record_job_finished(state: &str) {
    let labels = [("state", state.to_string())];
    counter!(names::JOBS_FINISHED_TOTAL, &labels).increment(1);
}

/// Record the wall time of one transcoder run.
pub fn record_ffmpeg_duration(duration_secs: f64) {
    histogram!(names::FFMPEG_DURATION_SECONDS).record(duration_secs);
}

/// Record bytes staged during intake.
pub fn record_bytes_staged(bytes: u64) {
    counter!(names::BYTES_STAGED_TOTAL).increment(bytes);
}
