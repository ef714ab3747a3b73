//! External process runner.
//!
//! Spawns the transcoder with its progress stream piped, and hands the
//! stream to the caller *before* waiting. Consuming and waiting run
//! concurrently, so the child never blocks on a full pipe.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, Command};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Spawns external tool processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
}

impl ProcessRunner {
    /// Create a runner for the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Create a runner for ffmpeg, verifying it is reachable.
    pub fn ffmpeg() -> MediaResult<Self> {
        let path = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        Ok(Self::new(path))
    }

    /// The executable this runner spawns.
    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Start the process with stderr piped.
    ///
    /// A start failure (missing executable, invalid argv) surfaces
    /// immediately; no monitor task is ever attached to a process that
    /// did not start.
    pub fn spawn(&self, args: &[String]) -> MediaResult<ProcessHandle> {
        debug!("Spawning {} {}", self.program.display(), args.join(" "));

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::SpawnFailed {
                program: self.program.to_string_lossy().to_string(),
                source,
            })?;

        Ok(ProcessHandle { child })
    }
}

/// A running external process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
}

impl ProcessHandle {
    /// Take the progress/diagnostic stream. Must be consumed concurrently
    /// with [`ProcessHandle::wait`].
    pub fn take_progress_stream(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// OS process id, if the process is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> MediaResult<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Terminate the process and reap it.
    ///
    /// Idempotent: calling it twice, or after the process already
    /// exited, is a no-op.
    pub async fn kill(&mut self) {
        // start_kill errors when the process is already gone
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
