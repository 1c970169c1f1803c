//! Structured logging init, access-log export, a Slack-notification seam,
//! and Prometheus metrics, shared by the frontend, worker and server
//! binaries.

pub mod access_log;
pub mod logging;
pub mod metrics;
pub mod slack;

pub use access_log::{AccessLogConfig, AccessLogExporter};
pub use metrics::MetricsCollector;
pub use slack::{NoopSlackNotifier, SlackNotifier};
