use async_trait::async_trait;

/// A handler attached to a `slack_rules` entry: gets a chance to forward a
/// log line to a Slack channel whenever the logger it's registered under
/// emits at or above the configured level.
///
/// Wiring a real Slack webhook is out of scope; this seam exists so the
/// rest of the system (config validation, logger registration) has
/// somewhere to attach one later without reshaping anything.
#[async_trait]
pub trait SlackNotifier: Send + Sync {
    async fn notify(&self, logger_name: &str, level: &str, message: &str);
}

/// The default notifier: every call is a no-op.
pub struct NoopSlackNotifier;

#[async_trait]
impl SlackNotifier for NoopSlackNotifier {
    async fn notify(&self, _logger_name: &str, _level: &str, _message: &str) {}
}
