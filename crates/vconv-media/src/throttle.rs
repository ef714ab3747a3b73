//! Report rate limiting.
//!
//! One `Throttle` instance exists per job. It turns raw position samples
//! into at most one report per significance threshold, synthesizes
//! heartbeats during silence, and derives a stable ETA from the whole-job
//! average rate.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use vconv_models::ProgressReport;

/// What a position value measures. Bytes never masquerade as a timeline
/// position in the emitted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Seconds,
    Bytes,
}

/// Thresholds governing report emission.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum percent delta between consecutive sample-driven reports.
    pub percent_step: f64,
    /// Minimum interval between consecutive sample-driven reports when
    /// the percent delta is below `percent_step`.
    pub min_interval: Duration,
    /// Silence span after which `tick` synthesizes a heartbeat.
    pub heartbeat_interval: Duration,
    /// ETA is withheld until this much wall time has elapsed.
    pub eta_min_elapsed: Duration,
    /// ETA is withheld below this percent (avoids divide blow-ups near 0).
    pub eta_min_percent: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            percent_step: 5.0,
            min_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            eta_min_elapsed: Duration::from_secs(5),
            eta_min_percent: 3.0,
        }
    }
}

/// Per-job throttle state.
pub struct Throttle {
    config: ThrottleConfig,
    unit: ProgressUnit,
    /// Total units (seconds or bytes); `None` disables percent and ETA.
    total: Option<f64>,
    started_at: Instant,
    /// Highest position seen; displayed progress never moves backward.
    max_position: Option<f64>,
    last_emitted_percent: Option<f64>,
    last_emit: Option<Instant>,
}

impl Throttle {
    /// Create a throttle for a job starting at `now`.
    pub fn new(config: ThrottleConfig, unit: ProgressUnit, total: Option<f64>, now: Instant) -> Self {
        let total = total.filter(|t| *t > 0.0);
        Self {
            config,
            unit,
            total,
            started_at: now,
            max_position: None,
            last_emitted_percent: None,
            last_emit: None,
        }
    }

    /// Offer a raw position sample.
    ///
    /// Returns a report when the sample is significant enough; otherwise
    /// the sample is discarded, never queued. The first sample always
    /// emits.
    pub fn offer(&mut self, position: f64, now: Instant) -> Option<ProgressReport> {
        // Out-of-order or repeated values clamp to the maximum seen.
        let position = match self.max_position {
            Some(max) if position < max => max,
            _ => position,
        };
        self.max_position = Some(position);

        let percent = self.percent_for(position);

        let significant = match self.last_emit {
            None => true,
            Some(last) => {
                let percent_jump = match (percent, self.last_emitted_percent) {
                    (Some(new), Some(old)) => (new - old).abs() >= self.config.percent_step,
                    (Some(_), None) => true,
                    _ => false,
                };
                percent_jump || now.duration_since(last) >= self.config.min_interval
            }
        };

        if !significant {
            return None;
        }

        let report = ProgressReport {
            percent,
            position_secs: self.position_secs(position),
            eta_secs: self.eta_secs(percent, now),
            is_heartbeat: false,
            observed_at: Utc::now(),
        };

        self.last_emitted_percent = percent;
        self.last_emit = Some(now);
        Some(report)
    }

    /// Synthesize a heartbeat if nothing has been emitted for
    /// `heartbeat_interval`. Called from the monitor's read-timeout path.
    pub fn tick(&mut self, now: Instant) -> Option<ProgressReport> {
        let since = now.duration_since(self.last_emit.unwrap_or(self.started_at));
        if since < self.config.heartbeat_interval {
            return None;
        }

        let report = ProgressReport {
            percent: self.last_emitted_percent,
            position_secs: self.max_position.and_then(|p| self.position_secs(p)),
            eta_secs: None,
            is_heartbeat: true,
            observed_at: Utc::now(),
        };

        self.last_emit = Some(now);
        Some(report)
    }

    /// The unconditional terminal report: 100% when the total is known.
    pub fn final_report(&mut self, now: Instant) -> ProgressReport {
        let position = self.total.or(self.max_position);
        self.last_emit = Some(now);
        self.last_emitted_percent = self.total.map(|_| 100.0);
        ProgressReport {
            percent: self.last_emitted_percent,
            position_secs: position.and_then(|p| self.position_secs(p)),
            eta_secs: None,
            is_heartbeat: false,
            observed_at: Utc::now(),
        }
    }

    fn percent_for(&self, position: f64) -> Option<f64> {
        self.total
            .map(|total| (position / total * 100.0).clamp(0.0, 100.0))
    }

    fn position_secs(&self, position: f64) -> Option<f64> {
        match self.unit {
            ProgressUnit::Seconds => Some(position),
            ProgressUnit::Bytes => None,
        }
    }

    /// Whole-job average rate: `eta = elapsed * (100 - percent) / percent`.
    /// Withheld until minimum elapsed time and percent are both reached.
    fn eta_secs(&self, percent: Option<f64>, now: Instant) -> Option<f64> {
        let percent = percent?;
        let elapsed = now.duration_since(self.started_at);
        if elapsed < self.config.eta_min_elapsed || percent < self.config.eta_min_percent {
            return None;
        }
        Some(elapsed.as_secs_f64() * (100.0 - percent) / percent)
    }
}
