use std::sync::Arc;
use std::time::Duration;

use coco_core::{Blocklist, CocoError, Group, Host};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::reply::{HostReply, Reply};

/// HTTP method an endpoint forwards with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Fans requests out to every non-blocklisted host in a group, bounded by a
/// global session semaphore, with a per-host deadline. Per-host failures
/// are captured as a [`HostReply`] rather than aborting the fan-out.
pub struct RequestForwarder {
    client: Client,
    sessions: Arc<Semaphore>,
    blocklist: Arc<Blocklist>,
}

impl RequestForwarder {
    pub fn new(blocklist: Arc<Blocklist>, session_limit: usize) -> Self {
        Self {
            client: Client::new(),
            sessions: Arc::new(Semaphore::new(session_limit.max(1))),
            blocklist,
        }
    }

    /// Forward `body` to every host in `group` not present in the blocklist,
    /// concurrently, each call bounded by `timeout`. Blocklisted hosts are
    /// silently omitted from the result.
    pub async fn forward_group(
        &self,
        group: &Group,
        method: Method,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Reply {
        let targets: Vec<Host> = group
            .hosts
            .iter()
            .filter(|h| !self.blocklist.contains(h))
            .cloned()
            .collect();
        self.forward_hosts(&targets, method, path, body, timeout).await
    }

    /// Forward `body` to an explicit host list, ignoring group membership
    /// (used for `call.forward` lists that reference hosts directly).
    pub async fn forward_hosts(
        &self,
        hosts: &[Host],
        method: Method,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Reply {
        let calls = hosts.iter().map(|host| {
            let client = self.client.clone();
            let sessions = Arc::clone(&self.sessions);
            let host = host.clone();
            let body = body.clone();
            let method = method.to_reqwest();
            let url = format!("{}{}", host.base_url(), path);

            async move {
                let _permit = sessions.acquire().await.expect("semaphore never closed");
                let reply = call_one(&client, method, &url, body, timeout).await;
                (host.to_string(), reply)
            }
        });

        let results = futures::future::join_all(calls).await;
        let mut reply = Reply::default();
        for (host, host_reply) in results {
            reply.insert(host, host_reply);
        }
        reply
    }
}

async fn call_one(
    client: &Client,
    method: reqwest::Method,
    url: &str,
    body: serde_json::Value,
    timeout: Duration,
) -> HostReply {
    let request = client
        .request(method, url)
        .timeout(timeout)
        .json(&body);

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            match response.json::<serde_json::Value>().await {
                Ok(decoded) => HostReply::ok(status, decoded),
                Err(e) => {
                    warn!(%url, error = %e, "backend returned a non-JSON body");
                    HostReply::backend_error(format!("non-decodable body: {e}"))
                }
            }
        }
        Err(e) => {
            warn!(%url, error = %e, "forward to backend failed");
            HostReply::backend_error(e.to_string())
        }
    }
}

/// Parse a `timeout`-style config string (`"30s"`, `"500ms"`) into a
/// [`Duration`]. Bare integers are treated as whole seconds.
pub fn parse_timeout(spec: &str) -> Result<Duration, CocoError> {
    let spec = spec.trim();
    if let Some(ms) = spec.strip_suffix("ms") {
        return ms
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| CocoError::ConfigError(format!("invalid timeout '{spec}ms'")));
    }
    if let Some(secs) = spec.strip_suffix('s') {
        return secs
            .trim()
            .parse::<f64>()
            .map(Duration::from_secs_f64)
            .map_err(|_| CocoError::ConfigError(format!("invalid timeout '{spec}s'")));
    }
    spec.parse::<f64>()
        .map(Duration::from_secs_f64)
        .map_err(|_| CocoError::ConfigError(format!("invalid timeout '{spec}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_and_milliseconds() {
        assert_eq!(parse_timeout("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timeout("soon").is_err());
    }

    #[tokio::test]
    async fn forward_hosts_omits_nothing_when_blocklist_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let blocklist = Arc::new(
            Blocklist::new(vec![Host::new("a", 1)], dir.path().join("bl.json")).unwrap(),
        );
        let forwarder = RequestForwarder::new(blocklist, 4);
        // No live server behind `a:1`; the call must still resolve into a
        // HostReply rather than panicking or hanging past the timeout.
        let reply = forwarder
            .forward_hosts(
                &[Host::new("a", 1)],
                Method::Get,
                "/ping",
                serde_json::json!({}),
                Duration::from_millis(200),
            )
            .await;
        assert_eq!(reply.by_host.len(), 1);
        assert!(reply.by_host.contains_key("a:1"));
    }
}
