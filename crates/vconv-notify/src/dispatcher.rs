//! Update dispatcher.
//!
//! Drains one job's update channel and delivers each update through a
//! [`NotificationSink`], honoring rate-limit signals with bounded
//! retries. An update that exhausts its attempts is dropped with a
//! warning; delivery failures never fail the underlying job, and the
//! conversion core never sleeps waiting on delivery.

use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vconv_models::{JobId, JobUpdate};

use crate::error::NotifyError;
use crate::sink::NotificationSink;

const UPDATES_DELIVERED_TOTAL: &str = "vconv_notify_updates_delivered_total";
const UPDATES_DROPPED_TOTAL: &str = "vconv_notify_updates_dropped_total";

/// Retry behavior for deliveries.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Total attempts per update (initial try included).
    pub max_attempts: u32,
    /// Base delay for exponential backoff on non-rate-limit failures.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl NotifyConfig {
    /// Backoff delay for a given retry number (1-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        delay.min(self.max_delay)
    }
}

/// Outcome counters for one dispatcher run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Delivers a job's updates to a sink, in channel order.
pub struct Dispatcher<S> {
    sink: S,
    config: NotifyConfig,
}

impl<S: NotificationSink> Dispatcher<S> {
    pub fn new(sink: S, config: NotifyConfig) -> Self {
        Self { sink, config }
    }

    /// Drain the channel until the sending side closes it (the job's
    /// terminal update is the last message). Updates are delivered in
    /// non-decreasing time order; nothing is delivered after the
    /// terminal update because nothing is sent after it.
    pub async fn run(&self, job_id: &JobId, mut rx: mpsc::Receiver<JobUpdate>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        while let Some(update) = rx.recv().await {
            if self.deliver_with_retry(job_id, &update).await {
                stats.delivered += 1;
            } else {
                stats.dropped += 1;
            }
        }

        debug!(
            job_id = %job_id,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Dispatcher finished"
        );
        stats
    }

    /// Deliver one update, retrying under the configured policy.
    /// Returns false when the update was dropped.
    async fn deliver_with_retry(&self, job_id: &JobId, update: &JobUpdate) -> bool {
        let mut attempt = 1u32;

        loop {
            match self.sink.deliver(job_id, update).await {
                Ok(()) => {
                    counter!(UPDATES_DELIVERED_TOTAL).increment(1);
                    return true;
                }
                Err(e) if !e.is_retryable() || attempt >= self.config.max_attempts => {
                    warn!(
                        job_id = %job_id,
                        attempts = attempt,
                        "Dropping update after delivery failure: {}", e
                    );
                    counter!(UPDATES_DROPPED_TOTAL).increment(1);
                    return false;
                }
                Err(NotifyError::RateLimited { retry_after }) => {
                    debug!(
                        job_id = %job_id,
                        "Rate limited, waiting {:?} before retry", retry_after
                    );
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => {
                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(
                        job_id = %job_id,
                        attempt,
                        "Delivery failed ({}), retrying in {:?}", e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Sink that fails a fixed number of times before succeeding.
    struct FlakySink {
        failures_left: AtomicU32,
        error_kind: fn() -> NotifyError,
        delivered: Mutex<Vec<JobUpdate>>,
        attempts: AtomicU32,
    }

    impl FlakySink {
        fn new(failures: u32, error_kind: fn() -> NotifyError) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                error_kind,
                delivered: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for &FlakySink {
        async fn deliver(&self, _job_id: &JobId, update: &JobUpdate) -> crate::NotifyResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err((self.error_kind)());
            }
            self.delivered.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    fn rate_limited() -> NotifyError {
        NotifyError::rate_limited(Duration::from_secs(3))
    }

    fn endpoint_error() -> NotifyError {
        NotifyError::Endpoint { status: 502 }
    }

    async fn run_one(sink: &FlakySink, update: JobUpdate) -> DispatchStats {
        let dispatcher = Dispatcher::new(sink, NotifyConfig::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(update).await.unwrap();
        drop(tx);
        dispatcher.run(&JobId::new(), rx).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_delivery_eventually_succeeds() {
        let sink = FlakySink::new(2, rate_limited);
        let stats = run_one(&sink, JobUpdate::Cancelled).await;

        assert_eq!(stats, DispatchStats { delivered: 1, dropped: 0 });
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_retry_on_endpoint_error() {
        let sink = FlakySink::new(3, endpoint_error);
        let stats = run_one(&sink, JobUpdate::Cancelled).await;

        assert_eq!(stats.delivered, 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_dropped_after_bounded_attempts() {
        let sink = FlakySink::new(u32::MAX, endpoint_error);
        let stats = run_one(&sink, JobUpdate::Cancelled).await;

        assert_eq!(stats, DispatchStats { delivered: 0, dropped: 1 });
        assert_eq!(
            sink.attempts.load(Ordering::SeqCst),
            NotifyConfig::default().max_attempts
        );
    }

    #[tokio::test]
    async fn test_updates_delivered_in_order() {
        let sink = FlakySink::new(0, endpoint_error);
        let dispatcher = Dispatcher::new(&sink, NotifyConfig::default());
        let (tx, rx) = mpsc::channel(8);

        let first = JobUpdate::Failed {
            message: "first".into(),
            detail: None,
        };
        let second = JobUpdate::Cancelled;
        tx.send(first.clone()).await.unwrap();
        tx.send(second.clone()).await.unwrap();
        drop(tx);

        let stats = dispatcher.run(&JobId::new(), rx).await;
        assert_eq!(stats.delivered, 2);
        assert_eq!(*sink.delivered.lock().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_backoff_delays_grow_and_cap() {
        let config = NotifyConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(2));
        assert!(config.delay_for_attempt(20) <= config.max_delay);
    }
}
