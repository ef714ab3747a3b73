//! Duration probing via ffprobe.
//!
//! Probe failure is recoverable: a job without a known duration reports
//! heartbeats instead of percentages, it does not abort.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Probed media information.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_secs: f64,
    /// Container size in bytes, when reported
    pub size_bytes: Option<u64>,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

/// Probe a media file with a specific ffprobe executable.
pub async fn probe_media(
    ffprobe: impl AsRef<Path>,
    path: impl AsRef<Path>,
) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(ffprobe.as_ref())
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::FfprobeNotFound,
            _ => MediaError::Io(e),
        })?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            "FFprobe exited with non-zero status",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    parse_probe_output(&output.stdout)
}

/// Probe the source duration in seconds.
pub async fn probe_duration(
    ffprobe: impl AsRef<Path>,
    path: impl AsRef<Path>,
) -> MediaResult<f64> {
    let info = probe_media(ffprobe, path).await?;
    debug!("Probed duration: {:.3}s", info.duration_secs);
    Ok(info.duration_secs)
}

/// Parse ffprobe JSON into [`MediaInfo`]. Pure so it is testable without
/// the binary.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let duration_secs = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| MediaError::InvalidMedia("no duration in probe output".to_string()))?;

    let size_bytes = probe
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok());

    Ok(MediaInfo {
        duration_secs,
        size_bytes,
    })
}
