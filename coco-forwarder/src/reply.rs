use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One host's outcome for a single forward: a decoded JSON body (or a
/// structured error descriptor) paired with the HTTP status that produced
/// it, or `0` if the call never reached a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HostReply {
    pub fn ok(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn backend_error(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// How a reply aggregate should be summarised to the client. `Full` returns
/// every per-host body; `CodesOverview` collapses bodies into status codes
/// only; `Single` assumes exactly one host and unwraps its body directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyShape {
    Full,
    CodesOverview,
    Single,
}

impl Default for ReplyShape {
    fn default() -> Self {
        ReplyShape::Full
    }
}

/// The `{host → (body, status)}` result of one fan-out, keyed by
/// `host:port` string for a stable, sorted rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(flatten)]
    pub by_host: BTreeMap<String, HostReply>,
}

impl Reply {
    pub fn insert(&mut self, host: impl Into<String>, reply: HostReply) {
        self.by_host.insert(host.into(), reply);
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    pub fn bodies(&self) -> impl Iterator<Item = &serde_json::Value> {
        self.by_host.values().map(|r| &r.body)
    }

    /// Render this aggregate per `shape`, for inclusion in the client-facing
    /// reply envelope.
    pub fn render(&self, shape: ReplyShape) -> serde_json::Value {
        match shape {
            ReplyShape::Full => serde_json::to_value(&self.by_host).unwrap_or_default(),
            ReplyShape::CodesOverview => {
                let overview: BTreeMap<&str, u16> = self
                    .by_host
                    .iter()
                    .map(|(host, r)| (host.as_str(), r.status))
                    .collect();
                serde_json::to_value(overview).unwrap_or_default()
            }
            ReplyShape::Single => self
                .by_host
                .values()
                .next()
                .map(|r| r.body.clone())
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_shape_renders_every_host() {
        let mut reply = Reply::default();
        reply.insert("a:1", HostReply::ok(200, serde_json::json!({"x": 1})));
        reply.insert("b:2", HostReply::ok(200, serde_json::json!({"x": 2})));
        let rendered = reply.render(ReplyShape::Full);
        assert_eq!(rendered["a:1"]["body"]["x"], 1);
    }

    #[test]
    fn codes_overview_strips_bodies() {
        let mut reply = Reply::default();
        reply.insert("a:1", HostReply::ok(200, serde_json::json!({"x": 1})));
        let rendered = reply.render(ReplyShape::CodesOverview);
        assert_eq!(rendered["a:1"], 200);
    }

    #[test]
    fn single_shape_unwraps_the_only_host() {
        let mut reply = Reply::default();
        reply.insert("a:1", HostReply::ok(200, serde_json::json!({"x": 1})));
        let rendered = reply.render(ReplyShape::Single);
        assert_eq!(rendered["x"], 1);
    }
}
