//! Inbound file intake.
//!
//! Stages the source file into the job workspace, reporting transfer
//! progress through the same throttled channel the transcode monitor
//! uses; the byte counter is just a different sample source.

use std::path::Path;

use tokio::time::Instant;
use tracing::debug;

use vconv_media::{copy_with_progress, ReportSender, ThrottleConfig, TransferTracker};

use crate::error::{WorkerError, WorkerResult};

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Copy `source` into `dest`, emitting throttled transfer reports.
/// Returns the number of bytes staged.
pub async fn stage_input(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    throttle: ThrottleConfig,
    sink: &ReportSender,
) -> WorkerResult<u64> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    let total_bytes = tokio::fs::metadata(source).await.ok().map(|m| m.len());
    let mut tracker = TransferTracker::new(throttle, total_bytes, Instant::now());

    let mut reader = tokio::fs::File::open(source).await.map_err(|e| {
        WorkerError::intake_failed(format!("cannot open {}: {}", source.display(), e))
    })?;
    let mut writer = tokio::fs::File::create(dest).await.map_err(|e| {
        WorkerError::intake_failed(format!("cannot create {}: {}", dest.display(), e))
    })?;

    let copied = copy_with_progress(&mut reader, &mut writer, COPY_CHUNK_SIZE, |done| {
        if let Some(report) = tracker.update(done, Instant::now()) {
            sink.send_report(report);
        }
    })
    .await?;

    sink.send_report(tracker.finish(Instant::now()));
    debug!(
        "Staged {} ({} bytes) into {}",
        source.display(),
        copied,
        dest.display()
    );
    Ok(copied)
}
