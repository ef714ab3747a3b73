//! Byte-transfer progress tracking.
//!
//! Inbound file transfers reuse the exact throttling discipline of the
//! transcode monitor; only the sample source differs: a
//! `(bytes_done, bytes_total)` callback from the transfer primitive
//! instead of parsed text.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use vconv_models::ProgressReport;

use crate::throttle::{ProgressUnit, Throttle, ThrottleConfig};

/// Throttled tracker for a single transfer.
pub struct TransferTracker {
    throttle: Throttle,
}

impl TransferTracker {
    /// Create a tracker; `total_bytes` of `None` disables percent.
    pub fn new(config: ThrottleConfig, total_bytes: Option<u64>, now: Instant) -> Self {
        Self {
            throttle: Throttle::new(
                config,
                ProgressUnit::Bytes,
                total_bytes.map(|b| b as f64),
                now,
            ),
        }
    }

    /// Offer the current byte count.
    pub fn update(&mut self, bytes_done: u64, now: Instant) -> Option<ProgressReport> {
        self.throttle.offer(bytes_done as f64, now)
    }

    /// Heartbeat chance while the transfer is stalled.
    pub fn tick(&mut self, now: Instant) -> Option<ProgressReport> {
        self.throttle.tick(now)
    }

    /// Unconditional terminal report for a completed transfer.
    pub fn finish(&mut self, now: Instant) -> ProgressReport {
        self.throttle.final_report(now)
    }
}

/// Copy `reader` to `writer`, invoking `on_progress(bytes_done)` after
/// every chunk. Returns the total bytes copied.
pub async fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    mut on_progress: F,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        on_progress(total);
    }

    writer.flush().await?;
    Ok(total)
}
