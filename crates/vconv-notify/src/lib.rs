//! Notification sink boundary.
//!
//! This crate provides:
//! - The [`NotificationSink`] trait consumed by the conversion core
//! - Sink implementations (webhook, tracing log, channel)
//! - A dispatcher that drains a job's update channel and retries
//!   deliveries under backoff when the endpoint signals rate limiting
//!
//! Delivery failures never propagate into the job: an update that
//! exhausts its retries is dropped with a logged warning.

pub mod dispatcher;
pub mod error;
pub mod sink;
pub mod webhook;

pub use dispatcher::{DispatchStats, Dispatcher, NotifyConfig};
pub use error::{NotifyError, NotifyResult};
pub use sink::{ChannelSink, LogSink, NotificationSink};
pub use webhook::WebhookSink;
