//! Per-job temp workspace.
//!
//! Each job owns one workspace directory; releasing it is unconditional
//! on every exit path. The `TempDir` guard removes the directory on drop
//! even if the job panics partway, and [`JobWorkspace::cleanup`] releases
//! it explicitly so the terminal update can be sent afterwards.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use vconv_models::JobId;

use crate::error::WorkerResult;

/// Temp directory holding a job's staged input.
pub struct JobWorkspace {
    dir: TempDir,
    job_id: JobId,
}

impl JobWorkspace {
    /// Create a workspace under `work_dir`, creating `work_dir` first if
    /// needed.
    pub fn create(work_dir: impl AsRef<Path>, job_id: &JobId) -> WorkerResult<Self> {
        let work_dir = work_dir.as_ref();
        std::fs::create_dir_all(work_dir)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(work_dir)?;

        debug!(job_id = %job_id, "Created workspace {}", dir.path().display());
        Ok(Self {
            dir,
            job_id: job_id.clone(),
        })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for the staged copy of the source file.
    pub fn input_path(&self, file_name: &str) -> PathBuf {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let ext = Path::new(file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.dir.path().join(format!("{}_input{}", stem, ext))
    }

    /// Release the workspace and everything in it.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(job_id = %self.job_id, "Cleaned up {}", path.display()),
            Err(e) => warn!(
                job_id = %self.job_id,
                "Workspace cleanup failed for {}: {}", path.display(), e
            ),
        }
    }
}
