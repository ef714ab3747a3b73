//! Worker configuration.

use std::time::Duration;

use vconv_media::{MonitorConfig, ThrottleConfig};
use vconv_notify::NotifyConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// FFmpeg executable
    pub ffmpeg_path: String,
    /// FFprobe executable
    pub ffprobe_path: String,
    /// Directory for per-job temp workspaces
    pub work_dir: String,
    /// Minimum percent delta between progress reports
    pub percent_step: f64,
    /// Minimum time between progress reports below the percent step
    pub min_report_interval: Duration,
    /// Heartbeat interval during silent stretches
    pub heartbeat_interval: Duration,
    /// Monitor read timeout
    pub read_timeout: Duration,
    /// Overall job timeout; `None` disables it
    pub job_timeout: Option<Duration>,
    /// Capacity of the per-job update channel
    pub update_channel_capacity: usize,
    /// Delivery attempts per update
    pub notify_max_attempts: u32,
    /// Base backoff delay for failed deliveries
    pub notify_base_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            work_dir: "/tmp/vconv".to_string(),
            percent_step: 5.0,
            min_report_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            read_timeout: Duration::from_millis(500),
            job_timeout: Some(Duration::from_secs(3600)),
            update_channel_capacity: 32,
            notify_max_attempts: 5,
            notify_base_delay: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            work_dir: std::env::var("VCONV_WORK_DIR").unwrap_or(defaults.work_dir),
            percent_step: std::env::var("VCONV_PERCENT_STEP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.percent_step),
            min_report_interval: Duration::from_secs(
                std::env::var("VCONV_MIN_REPORT_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            heartbeat_interval: Duration::from_secs(
                std::env::var("VCONV_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
            read_timeout: Duration::from_millis(
                std::env::var("VCONV_READ_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            job_timeout: match std::env::var("VCONV_JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.job_timeout,
            },
            update_channel_capacity: std::env::var("VCONV_UPDATE_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.update_channel_capacity),
            notify_max_attempts: std::env::var("VCONV_NOTIFY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.notify_max_attempts),
            notify_base_delay: Duration::from_millis(
                std::env::var("VCONV_NOTIFY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
        }
    }

    /// Throttle settings derived from this config.
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            percent_step: self.percent_step,
            min_interval: self.min_report_interval,
            heartbeat_interval: self.heartbeat_interval,
            ..ThrottleConfig::default()
        }
    }

    /// Monitor settings derived from this config.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            read_timeout: self.read_timeout,
            ..MonitorConfig::default()
        }
    }

    /// Notification retry settings derived from this config.
    pub fn notify_config(&self) -> NotifyConfig {
        NotifyConfig {
            max_attempts: self.notify_max_attempts,
            base_delay: self.notify_base_delay,
            ..NotifyConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = WorkerConfig::default();
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert!(config.heartbeat_interval >= Duration::from_secs(10));
        assert!(config.heartbeat_interval <= Duration::from_secs(30));
        assert!(config.job_timeout.is_some());
    }

    #[test]
    fn test_derived_configs() {
        let config = WorkerConfig {
            percent_step: 2.5,
            heartbeat_interval: Duration::from_secs(20),
            ..Default::default()
        };
        let throttle = config.throttle_config();
        assert_eq!(throttle.percent_step, 2.5);
        assert_eq!(throttle.heartbeat_interval, Duration::from_secs(20));
    }
}
