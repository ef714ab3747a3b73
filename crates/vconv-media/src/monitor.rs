//! Progress monitor.
//!
//! Runs as a background task parallel to the process wait: reads the
//! transcoder's output stream in bounded chunks with a short read timeout
//! (so heartbeats are serviced while the stream is silent), splits the
//! bytes into lines while retaining the trailing partial line across
//! reads, and feeds each complete line through the parser and throttle
//! out to the caller-supplied sink.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use vconv_models::{JobUpdate, ProgressReport};

use crate::parse::{classify_progress_line, ProgressField};
use crate::throttle::Throttle;

/// Monitor tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Upper bound on one stream read.
    pub chunk_size: usize,
    /// Read timeout; bounds every suspension so heartbeats and
    /// cancellation are serviced during silence.
    pub read_timeout: Duration,
    /// Byte budget for the retained diagnostic tail.
    pub diagnostic_tail_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            read_timeout: Duration::from_millis(500),
            diagnostic_tail_bytes: 4096,
        }
    }
}

/// Non-blocking sink handle for progress reports.
///
/// Reports ride a bounded channel; a slow consumer drops updates rather
/// than stalling the monitor.
#[derive(Clone)]
pub struct ReportSender {
    tx: mpsc::Sender<JobUpdate>,
}

impl ReportSender {
    pub fn new(tx: mpsc::Sender<JobUpdate>) -> Self {
        Self { tx }
    }

    /// Send a progress report without blocking. Returns false if the
    /// update was dropped (channel full or closed).
    pub fn send_report(&self, report: ProgressReport) -> bool {
        self.tx.try_send(JobUpdate::Progress(report)).is_ok()
    }
}

/// What the monitor observed, returned when it stops.
pub struct MonitorSummary {
    /// Bounded tail of non-progress output, the failure detail on a
    /// non-zero exit.
    pub diagnostic_tail: String,
    /// Raw position samples recognized.
    pub samples_seen: u64,
    /// Reports that passed the throttle.
    pub reports_emitted: u64,
    /// True when the monitor stopped due to cancellation rather than EOF.
    pub cancelled: bool,
    /// The job's throttle state, handed back so the caller can emit the
    /// terminal report against it.
    pub throttle: Throttle,
}

/// Bounded collection of recent diagnostic lines.
struct DiagnosticTail {
    lines: VecDeque<String>,
    bytes: usize,
    budget: usize,
}

impl DiagnosticTail {
    fn new(budget: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    fn push(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        self.bytes += line.len();
        self.lines.push_back(line.to_string());
        while self.bytes > self.budget {
            match self.lines.pop_front() {
                Some(dropped) => self.bytes -= dropped.len(),
                None => break,
            }
        }
    }

    fn join(self) -> String {
        let lines: Vec<String> = self.lines.into();
        lines.join("\n")
    }
}

/// Keys the `-progress` stream emits; everything else on the pipe is
/// diagnostic output.
fn is_progress_key(line: &str) -> bool {
    let key = match line.split_once('=') {
        Some((key, _)) => key,
        None => return false,
    };
    matches!(
        key,
        "frame"
            | "fps"
            | "bitrate"
            | "total_size"
            | "out_time_us"
            | "out_time_ms"
            | "out_time"
            | "dup_frames"
            | "drop_frames"
            | "speed"
            | "progress"
    ) || key.starts_with("stream_")
}

/// Run the monitor until EOF or cancellation.
///
/// Decode errors on individual bytes are substituted, never escalated;
/// unrecognized lines are kept as diagnostics. Cancellation may arrive
/// mid-read; once observed, no further report is emitted.
pub async fn run_monitor<R>(
    mut stream: R,
    mut throttle: Throttle,
    sink: ReportSender,
    mut cancel: watch::Receiver<bool>,
    config: MonitorConfig,
) -> MonitorSummary
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    let mut pending: Vec<u8> = Vec::new();
    let mut tail = DiagnosticTail::new(config.diagnostic_tail_bytes);
    let mut samples_seen = 0u64;
    let mut reports_emitted = 0u64;
    let mut cancelled = *cancel.borrow();

    while !cancelled {
        tokio::select! {
            changed = cancel.changed() => {
                // a dropped sender means the job is gone; stop either way
                if changed.is_err() || *cancel.borrow() {
                    cancelled = true;
                }
            }
            read = tokio::time::timeout(config.read_timeout, stream.read(&mut buf)) => {
                match read {
                    // silence: give the throttle its heartbeat chance
                    Err(_) => {
                        if let Some(hb) = throttle.tick(Instant::now()) {
                            if sink.send_report(hb) {
                                reports_emitted += 1;
                            }
                        }
                    }
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                            let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line_bytes[..pos]);
                            let line = line.trim_end_matches('\r');

                            match classify_progress_line(line) {
                                Some(ProgressField::End) => {
                                    debug!("Progress stream reported end");
                                }
                                Some(field) => {
                                    if let Some(position) = field.position_secs() {
                                        samples_seen += 1;
                                        if let Some(report) =
                                            throttle.offer(position, Instant::now())
                                        {
                                            if sink.send_report(report) {
                                                reports_emitted += 1;
                                            }
                                        }
                                    }
                                }
                                None => {
                                    if !is_progress_key(line) {
                                        tail.push(line);
                                    }
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Progress stream read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // trailing partial line, if the stream ended without a newline
    if !cancelled && !pending.is_empty() {
        let line = String::from_utf8_lossy(&pending);
        let line = line.trim_end_matches('\r');
        if let Some(position) =
            classify_progress_line(line).and_then(|f| f.position_secs())
        {
            samples_seen += 1;
            if let Some(report) = throttle.offer(position, Instant::now()) {
                if sink.send_report(report) {
                    reports_emitted += 1;
                }
            }
        } else if !is_progress_key(line) {
            tail.push(line);
        }
    }

    MonitorSummary {
        diagnostic_tail: tail.join(),
        samples_seen,
        reports_emitted,
        cancelled,
        throttle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{ProgressUnit, ThrottleConfig};
    use tokio::io::AsyncWriteExt;

    fn test_throttle(total: Option<f64>) -> Throttle {
        Throttle::new(
            ThrottleConfig::default(),
            ProgressUnit::Seconds,
            total,
            Instant::now(),
        )
    }

    fn channel() -> (ReportSender, mpsc::Receiver<JobUpdate>) {
        let (tx, rx) = mpsc::channel(32);
        (ReportSender::new(tx), rx)
    }

    fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn collect_reports(rx: &mut mpsc::Receiver<JobUpdate>) -> Vec<ProgressReport> {
        let mut reports = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let JobUpdate::Progress(report) = update {
                reports.push(report);
            }
        }
        reports
    }

    #[tokio::test]
    async fn test_monitor_parses_lines_to_reports() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let (sink, mut rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(Some(100.0)),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        writer
            .write_all(b"out_time_ms=50000\nprogress=continue\n")
            .await
            .unwrap();
        drop(writer);

        let summary = monitor.await.unwrap();
        assert_eq!(summary.samples_seen, 1);
        assert!(!summary.cancelled);

        let reports = collect_reports(&mut rx).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].percent, Some(50.0));
    }

    #[tokio::test]
    async fn test_partial_line_across_chunks() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let (sink, mut rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(Some(10.0)),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        // a line split at an arbitrary chunk boundary must reassemble
        writer.write_all(b"out_time_").await.unwrap();
        writer.flush().await.unwrap();
        tokio::task::yield_now().await;
        writer.write_all(b"us=5000000\n").await.unwrap();
        drop(writer);

        let summary = monitor.await.unwrap();
        assert_eq!(summary.samples_seen, 1);

        let reports = collect_reports(&mut rx).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].percent, Some(50.0));
    }

    #[tokio::test]
    async fn test_malformed_lines_never_sample() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let (sink, mut rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(Some(100.0)),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        writer
            .write_all(b"foo=bar\nout_time_us=\n\xff\xfebroken bytes\n")
            .await
            .unwrap();
        drop(writer);

        let summary = monitor.await.unwrap();
        assert_eq!(summary.samples_seen, 0);
        assert!(collect_reports(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_collected_for_failure_detail() {
        let (mut writer, reader) = tokio::io::duplex(512);
        let (sink, _rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(None),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        writer
            .write_all(b"Error opening input: No such file or directory\nframe=10\n")
            .await
            .unwrap();
        drop(writer);

        let summary = monitor.await.unwrap();
        assert!(summary.diagnostic_tail.contains("Error opening input"));
        // progress-stream keys are not diagnostics
        assert!(!summary.diagnostic_tail.contains("frame=10"));
    }

    #[tokio::test]
    async fn test_diagnostic_tail_is_bounded() {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let (sink, _rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let config = MonitorConfig {
            diagnostic_tail_bytes: 256,
            ..Default::default()
        };
        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(None),
            sink,
            cancel_rx,
            config,
        ));

        for i in 0..100 {
            let line = format!("diagnostic noise line number {}\n", i);
            writer.write_all(line.as_bytes()).await.unwrap();
        }
        drop(writer);

        let summary = monitor.await.unwrap();
        assert!(summary.diagnostic_tail.len() <= 256 + 64);
        // the tail keeps the most recent lines
        assert!(summary.diagnostic_tail.contains("line number 99"));
        assert!(!summary.diagnostic_tail.contains("line number 0\n"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_reports() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let (sink, mut rx) = channel();
        let (cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(Some(100.0)),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        writer.write_all(b"out_time_ms=10000\n").await.unwrap();
        // let the monitor process the first line before cancelling
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        let summary = monitor.await.unwrap();
        assert!(summary.cancelled);

        let before = collect_reports(&mut rx).await.len();
        // writes after cancellation never become reports
        let _ = writer.write_all(b"out_time_ms=90000\n").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(collect_reports(&mut rx).await.len(), 0);
        assert_eq!(before, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_during_silence() {
        let (writer, reader) = tokio::io::duplex(256);
        let (sink, mut rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(Some(100.0)),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        // no sample for heartbeat_interval * 1.5: a heartbeat must appear
        tokio::time::sleep(Duration::from_secs(23)).await;

        let reports = collect_reports(&mut rx).await;
        assert!(
            reports.iter().any(|r| r.is_heartbeat),
            "expected a heartbeat during silence"
        );

        drop(writer);
        let _ = monitor.await.unwrap();
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let (sink, mut rx) = channel();
        let (_cancel_tx, cancel_rx) = cancel_pair();

        let monitor = tokio::spawn(run_monitor(
            reader,
            test_throttle(Some(10.0)),
            sink,
            cancel_rx,
            MonitorConfig::default(),
        ));

        writer.write_all(b"out_time_ms=5000").await.unwrap();
        drop(writer);

        let summary = monitor.await.unwrap();
        assert_eq!(summary.samples_seen, 1);
        assert_eq!(collect_reports(&mut rx).await.len(), 1);
    }
}
