//! Job runner.
//!
//! Ties intake, duration probing, the transcoder process and its
//! progress monitor into one request/response operation. One task drives
//! the process wait, a second drives the monitor's read loop; they start
//! together and are joined together. Cancellation and the overall job
//! timeout funnel into the same path: kill the process, cancel the
//! monitor, await both, release the workspace, then deliver exactly one
//! terminal update.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vconv_media::{
    probe_duration, run_monitor, FfmpegCommand, MediaError, MonitorSummary, ProcessRunner,
    ProgressUnit, ReportSender, Throttle,
};
use vconv_models::{ConversionJob, JobUpdate, OutputProfile, ProgressReport};
use vconv_notify::{Dispatcher, NotificationSink};

use crate::config::WorkerConfig;
use crate::intake::stage_input;
use crate::metrics;
use crate::workspace::JobWorkspace;

/// One conversion request from the front end.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Source media file
    pub source_path: PathBuf,
    /// Final destination for the converted file
    pub output_path: PathBuf,
    /// Selected output profile
    pub profile: OutputProfile,
}

/// Runs conversion jobs to completion.
pub struct JobRunner {
    config: WorkerConfig,
}

/// How the wait phase ended.
enum WaitOutcome {
    Exited(std::process::ExitStatus),
    WaitFailed(MediaError),
    Cancelled,
    TimedOut,
}

impl JobRunner {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Run one job to its terminal state.
    ///
    /// The returned job is always terminal; failures are reported through
    /// its state, never as an `Err`. The sink receives the throttled
    /// update stream followed by exactly one terminal update, delivered
    /// after the workspace has been released.
    pub async fn run<S>(
        &self,
        request: ConversionRequest,
        sink: S,
        cancel: watch::Receiver<bool>,
    ) -> ConversionJob
    where
        S: NotificationSink + 'static,
    {
        let job = ConversionJob::new(&request.source_path, &request.output_path, request.profile);
        info!(
            job_id = %job.id,
            profile = %request.profile,
            "Accepted conversion job for {}", request.source_path.display()
        );
        metrics::record_job_started(request.profile.as_str());

        let (tx, rx) = mpsc::channel(self.config.update_channel_capacity.max(1));
        let dispatcher = Dispatcher::new(sink, self.config.notify_config());
        let dispatcher_id = job.id.clone();
        let dispatcher_task = tokio::spawn(async move { dispatcher.run(&dispatcher_id, rx).await });

        let (job, terminal) = self.execute(job, &request, &tx, cancel).await;

        // resources are released by now; one terminal update, delivered once
        if tx.send(terminal).await.is_err() {
            warn!(job_id = %job.id, "Update channel closed before terminal update");
        }
        drop(tx);

        match dispatcher_task.await {
            Ok(stats) => debug!(
                job_id = %job.id,
                delivered = stats.delivered,
                dropped = stats.dropped,
                "Notification dispatch complete"
            ),
            Err(e) => warn!(job_id = %job.id, "Dispatcher task failed: {}", e),
        }

        metrics::record_job_finished(job.state.as_str());
        info!(job_id = %job.id, state = %job.state, "Job finished");
        job
    }

    /// Drive the job through its states. Every exit path releases the
    /// workspace before returning the terminal update.
    async fn execute(
        &self,
        job: ConversionJob,
        request: &ConversionRequest,
        tx: &mpsc::Sender<JobUpdate>,
        mut cancel: watch::Receiver<bool>,
    ) -> (ConversionJob, JobUpdate) {
        let reports = ReportSender::new(tx.clone());

        let workspace = match JobWorkspace::create(&self.config.work_dir, &job.id) {
            Ok(ws) => ws,
            Err(e) => return failed(job, format!("workspace creation failed: {}", e), None),
        };

        // inbound transfer, throttled like the transcode itself
        let source_name = request
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let staged = workspace.input_path(&source_name);
        match stage_input(
            &request.source_path,
            &staged,
            self.config.throttle_config(),
            &reports,
        )
        .await
        {
            Ok(bytes) => metrics::record_bytes_staged(bytes),
            Err(e) => {
                workspace.cleanup();
                return failed(job, e.to_string(), None);
            }
        }
        let mut job = job;
        job.input_path = staged.clone();

        // probe failure does not abort; it only disables percent reporting
        let job = job.start_probing();
        let total_duration = match probe_duration(&self.config.ffprobe_path, &staged).await {
            Ok(duration) => Some(duration),
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    "Duration probe failed, progress degrades to heartbeats: {}", e
                );
                None
            }
        };
        let job = job.begin_running(total_duration);

        let command = FfmpegCommand::for_profile(&staged, &request.output_path, request.profile);
        let runner = ProcessRunner::new(&self.config.ffmpeg_path);
        let mut handle = match runner.spawn(&command.build_args()) {
            Ok(handle) => handle,
            Err(e) => {
                // no monitor task is ever started for a process that did not start
                workspace.cleanup();
                return failed(job, format!("transcoder start failed: {}", e), None);
            }
        };

        let (monitor_cancel, monitor_cancel_rx) = watch::channel(false);
        let monitor_task = handle.take_progress_stream().map(|stream| {
            let throttle = Throttle::new(
                self.config.throttle_config(),
                ProgressUnit::Seconds,
                total_duration,
                Instant::now(),
            );
            tokio::spawn(run_monitor(
                stream,
                throttle,
                reports.clone(),
                monitor_cancel_rx,
                self.config.monitor_config(),
            ))
        });

        let started = Instant::now();
        let outcome = tokio::select! {
            status = handle.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => WaitOutcome::WaitFailed(e),
            },
            _ = cancel_requested(&mut cancel) => WaitOutcome::Cancelled,
            _ = job_timeout(self.config.job_timeout) => WaitOutcome::TimedOut,
        };
        metrics::record_ffmpeg_duration(started.elapsed().as_secs_f64());

        match outcome {
            WaitOutcome::Exited(status) if status.success() => {
                let summary = join_monitor(monitor_task, &monitor_cancel, false).await;

                // unconditional terminal 100% report, regardless of throttle state
                let final_report = match summary {
                    Some(mut summary) => summary.throttle.final_report(Instant::now()),
                    None => ProgressReport {
                        percent: total_duration.map(|_| 100.0),
                        position_secs: total_duration,
                        eta_secs: None,
                        is_heartbeat: false,
                        observed_at: Utc::now(),
                    },
                };
                if tx.send(JobUpdate::Progress(final_report)).await.is_err() {
                    warn!(job_id = %job.id, "Update channel closed before final report");
                }

                workspace.cleanup();
                (
                    job.succeed(),
                    JobUpdate::Succeeded {
                        output_path: request.output_path.display().to_string(),
                    },
                )
            }
            WaitOutcome::Exited(status) => {
                let summary = join_monitor(monitor_task, &monitor_cancel, false).await;
                let detail = summary
                    .map(|s| s.diagnostic_tail)
                    .filter(|tail| !tail.is_empty());
                let message = match status.code() {
                    Some(code) => format!("transcoder exited with code {}", code),
                    None => "transcoder terminated by signal".to_string(),
                };
                remove_partial_output(&request.output_path).await;
                workspace.cleanup();
                failed(job, message, detail)
            }
            WaitOutcome::WaitFailed(e) => {
                handle.kill().await;
                let _ = join_monitor(monitor_task, &monitor_cancel, true).await;
                remove_partial_output(&request.output_path).await;
                workspace.cleanup();
                failed(job, format!("transcoder wait failed: {}", e), None)
            }
            WaitOutcome::Cancelled => {
                info!(job_id = %job.id, "Cancellation requested, terminating transcoder");
                handle.kill().await;
                let _ = join_monitor(monitor_task, &monitor_cancel, true).await;
                remove_partial_output(&request.output_path).await;
                workspace.cleanup();
                (job.cancel(), JobUpdate::Cancelled)
            }
            WaitOutcome::TimedOut => {
                let timeout_secs = self
                    .config
                    .job_timeout
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                warn!(job_id = %job.id, "Job timed out after {}s", timeout_secs);
                handle.kill().await;
                let _ = join_monitor(monitor_task, &monitor_cancel, true).await;
                remove_partial_output(&request.output_path).await;
                workspace.cleanup();
                failed(
                    job,
                    format!("job timed out after {}s", timeout_secs),
                    None,
                )
            }
        }
    }
}

/// Terminal failure pair.
fn failed(job: ConversionJob, message: String, detail: Option<String>) -> (ConversionJob, JobUpdate) {
    let job = job.fail(&message);
    (job, JobUpdate::Failed { message, detail })
}

/// Resolves when external cancellation is requested; never resolves once
/// the cancel sender is gone.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves when the configured job timeout elapses; never with no timeout.
async fn job_timeout(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Join the monitor task. On the normal exit path EOF ends the monitor on
/// its own; `force_cancel` is the kill path, where the monitor must stop
/// even mid-read.
async fn join_monitor(
    task: Option<JoinHandle<MonitorSummary>>,
    cancel: &watch::Sender<bool>,
    force_cancel: bool,
) -> Option<MonitorSummary> {
    let mut task = task?;

    if force_cancel {
        let _ = cancel.send(true);
    }

    match tokio::time::timeout(Duration::from_secs(2), &mut task).await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            warn!("Monitor task failed: {}", e);
            None
        }
        Err(_) => {
            let _ = cancel.send(true);
            match task.await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Monitor task failed after cancel: {}", e);
                    None
                }
            }
        }
    }
}

/// Best-effort removal of a partially written output file.
async fn remove_partial_output(path: &Path) {
    if tokio::fs::remove_file(path).await.is_ok() {
        debug!("Removed partial output {}", path.display());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tokio::time::Duration;
    use vconv_models::{JobId, JobState};
    use vconv_notify::ChannelSink;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn probe_stub(dir: &Path) -> PathBuf {
        write_script(
            dir,
            "ffprobe",
            r#"printf '{"format":{"duration":"10.000000","size":"1000"}}'"#,
        )
    }

    /// Emits one mid-stream sample, creates the output file, exits 0.
    fn ffmpeg_ok_stub(dir: &Path) -> PathBuf {
        write_script(
            dir,
            "ffmpeg",
            "for last; do :; done\nprintf 'out_time_ms=5000\\nprogress=end\\n' 1>&2\n: > \"$last\"",
        )
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: WorkerConfig,
        request: ConversionRequest,
    }

    fn fixture(ffmpeg_body: Option<&str>, ffprobe_body: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let ffmpeg_path = match ffmpeg_body {
            Some(body) => write_script(&bin, "ffmpeg", body),
            None => ffmpeg_ok_stub(&bin),
        };
        let ffprobe_path = match ffprobe_body {
            Some(body) => write_script(&bin, "ffprobe", body),
            None => probe_stub(&bin),
        };

        let source = dir.path().join("movie.webm");
        std::fs::write(&source, vec![1u8; 50_000]).unwrap();

        let config = WorkerConfig {
            ffmpeg_path: ffmpeg_path.to_string_lossy().to_string(),
            ffprobe_path: ffprobe_path.to_string_lossy().to_string(),
            work_dir: dir.path().join("work").to_string_lossy().to_string(),
            ..Default::default()
        };
        let request = ConversionRequest {
            source_path: source,
            output_path: dir.path().join("movie.mp4"),
            profile: OutputProfile::Mp4H264,
        };

        Fixture {
            _dir: dir,
            config,
            request,
        }
    }

    async fn run_and_collect(
        fixture: &Fixture,
    ) -> (ConversionJob, Vec<JobUpdate>) {
        let (tx, mut rx) = mpsc::channel::<(JobId, JobUpdate)>(128);
        let runner = JobRunner::new(fixture.config.clone());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let job = runner
            .run(fixture.request.clone(), ChannelSink::new(tx), cancel_rx)
            .await;

        let mut updates = Vec::new();
        while let Some((_, update)) = rx.recv().await {
            updates.push(update);
        }
        (job, updates)
    }

    fn terminal_count(updates: &[JobUpdate]) -> usize {
        updates.iter().filter(|u| u.is_terminal()).count()
    }

    #[tokio::test]
    async fn test_successful_job() {
        let fixture = fixture(None, None);
        let (job, updates) = run_and_collect(&fixture).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.total_duration_secs, Some(10.0));
        assert!(fixture.request.output_path.exists());

        // exactly one terminal update, delivered last
        assert_eq!(terminal_count(&updates), 1);
        assert!(matches!(
            updates.last().unwrap(),
            JobUpdate::Succeeded { .. }
        ));

        // the stream ends with an unconditional 100% report
        let last_progress = updates
            .iter()
            .rev()
            .find_map(|u| match u {
                JobUpdate::Progress(r) => Some(r),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.percent, Some(100.0));

        // the mid-stream sample (5s of 10s) was reported
        assert!(updates.iter().any(|u| matches!(
            u,
            JobUpdate::Progress(r) if r.percent == Some(50.0) && r.position_secs == Some(5.0)
        )));

        // workspace released
        let leftovers: Vec<_> = std::fs::read_dir(&fixture.config.work_dir)
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_failed_job_captures_diagnostics() {
        let fixture = fixture(
            Some("echo 'Error: invalid data found when processing input' 1>&2\nexit 1"),
            None,
        );
        let (job, updates) = run_and_collect(&fixture).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(terminal_count(&updates), 1);
        match updates.last().unwrap() {
            JobUpdate::Failed { message, detail } => {
                assert!(message.contains("code 1"));
                assert!(detail.as_deref().unwrap().contains("invalid data"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!fixture.request.output_path.exists());
    }

    #[tokio::test]
    async fn test_probe_failure_degrades_to_heartbeats() {
        let fixture = fixture(None, Some("exit 1"));
        let (job, updates) = run_and_collect(&fixture).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.total_duration_secs, None);

        // transcode reports never carry a percent without a known duration;
        // transfer reports (known byte total) are the ones with no position
        for update in &updates {
            if let JobUpdate::Progress(report) = update {
                assert!(
                    !(report.percent.is_some() && report.position_secs.is_some()),
                    "unexpected percent on transcode report: {:?}",
                    report
                );
            }
        }
        assert!(matches!(
            updates.last().unwrap(),
            JobUpdate::Succeeded { .. }
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_fails_immediately() {
        let mut fixture = fixture(None, None);
        fixture.config.ffmpeg_path = "/nonexistent/transcoder".to_string();
        let (job, updates) = run_and_collect(&fixture).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(terminal_count(&updates), 1);
        match updates.last().unwrap() {
            JobUpdate::Failed { message, .. } => {
                assert!(message.contains("start failed"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_mid_run() {
        let fixture = fixture(Some("sleep 30"), None);
        let (tx, mut rx) = mpsc::channel::<(JobId, JobUpdate)>(128);
        let runner = JobRunner::new(fixture.config.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let request = fixture.request.clone();
        let run_task =
            tokio::spawn(async move { runner.run(request, ChannelSink::new(tx), cancel_rx).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let started = std::time::Instant::now();
        cancel_tx.send(true).unwrap();

        let job = run_task.await.unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        // the external process was terminated, not waited out
        assert!(started.elapsed() < Duration::from_secs(10));

        let mut updates = Vec::new();
        while let Some((_, update)) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(terminal_count(&updates), 1);
        assert!(matches!(updates.last().unwrap(), JobUpdate::Cancelled));
    }

    #[tokio::test]
    async fn test_job_timeout_uses_cancellation_path() {
        let mut fixture = fixture(Some("sleep 30"), None);
        fixture.config.job_timeout = Some(Duration::from_millis(300));
        let started = std::time::Instant::now();
        let (job, updates) = run_and_collect(&fixture).await;

        assert_eq!(job.state, JobState::Failed);
        assert!(started.elapsed() < Duration::from_secs(10));
        match updates.last().unwrap() {
            JobUpdate::Failed { message, .. } => assert!(message.contains("timed out")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_source_fails_intake() {
        let mut fixture = fixture(None, None);
        fixture.request.source_path = PathBuf::from("/nonexistent/source.webm");
        let (job, updates) = run_and_collect(&fixture).await;

        assert_eq!(job.state, JobState::Failed);
        match updates.last().unwrap() {
            JobUpdate::Failed { message, .. } => assert!(message.contains("Intake failed")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }
}
