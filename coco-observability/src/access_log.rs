use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 10_000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const FLUSH_BATCH_MAX: usize = 500;

/// Where to ship batched access-log entries, and whether to ship them at
/// all. Constructed from `CocoConfig`; a `None` endpoint disables export
/// entirely without the caller needing a separate feature flag.
#[derive(Debug, Clone)]
pub struct AccessLogConfig {
    pub enabled: bool,
    pub endpoint_url: String,
}

/// Ships one JSON log line per request to an external log sink (e.g. a
/// VictoriaLogs-compatible ingest endpoint), batching over a channel so the
/// request path never blocks on the network call.
///
/// When disabled, `sender` is `None` and every call on this type is a
/// guaranteed no-op — no background task is spawned, no allocation happens
/// beyond the struct itself.
pub struct AccessLogExporter {
    sender: Option<mpsc::Sender<Value>>,
}

impl AccessLogExporter {
    pub fn new(config: &AccessLogConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let endpoint_url = config.endpoint_url.clone();
        tokio::spawn(Self::flush_loop(rx, endpoint_url));

        Self { sender: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Record one completed request. Silently dropped if the channel is
    /// full (the log sink falling behind must never apply backpressure to
    /// request handling) or if export is disabled.
    pub fn access_log(
        &self,
        method: &str,
        endpoint: &str,
        status: u16,
        latency_ms: f64,
        client_ip: &str,
    ) {
        let Some(sender) = &self.sender else {
            return;
        };

        let entry = json!({
            "_msg": format!("{method} {endpoint} -> {status}"),
            "_time": Utc::now().to_rfc3339(),
            "level": if status >= 500 { "error" } else { "info" },
            "type": "access",
            "method": method,
            "endpoint": endpoint,
            "status": status,
            "latency_ms": latency_ms,
            "client_ip": client_ip,
        });

        if let Err(err) = sender.try_send(entry) {
            warn!(%err, "access log channel full, dropping entry");
        }
    }

    async fn flush_loop(mut rx: mpsc::Receiver<Value>, endpoint_url: String) {
        let client = reqwest::Client::new();
        let mut batch = Vec::with_capacity(FLUSH_BATCH_MAX);
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                entry = rx.recv() => match entry {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= FLUSH_BATCH_MAX {
                            Self::flush(&client, &endpoint_url, &mut batch).await;
                        }
                    }
                    None => {
                        Self::flush(&client, &endpoint_url, &mut batch).await;
                        return;
                    }
                },
                _ = interval.tick() => {
                    Self::flush(&client, &endpoint_url, &mut batch).await;
                }
            }
        }
    }

    async fn flush(client: &reqwest::Client, endpoint_url: &str, batch: &mut Vec<Value>) {
        if batch.is_empty() {
            return;
        }

        let body = batch
            .drain(..)
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        if let Err(err) = client
            .post(endpoint_url)
            .header("Content-Type", "application/stream+json")
            .body(body)
            .send()
            .await
        {
            debug!(%err, "access log flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_constructor_has_no_sender() {
        let exporter = AccessLogExporter::disabled();
        assert!(exporter.sender.is_none());
    }

    #[test]
    fn config_disabled_produces_no_sender() {
        let exporter = AccessLogExporter::new(&AccessLogConfig {
            enabled: false,
            endpoint_url: "http://unused".to_string(),
        });
        assert!(exporter.sender.is_none());
    }

    #[tokio::test]
    async fn access_log_on_disabled_exporter_does_not_panic() {
        let exporter = AccessLogExporter::disabled();
        exporter.access_log("GET", "ping", 200, 1.2, "127.0.0.1");
    }

    #[tokio::test]
    async fn access_log_backpressure_does_not_panic() {
        let exporter = AccessLogExporter::new(&AccessLogConfig {
            enabled: true,
            endpoint_url: "http://127.0.0.1:1/ignored".to_string(),
        });
        for _ in 0..10_100 {
            exporter.access_log("GET", "ping", 200, 0.5, "127.0.0.1");
        }
    }
}
