use serde::{Deserialize, Serialize};
use std::fmt;

/// The symbolic host name the controller uses to denote itself in replies
/// that were produced locally rather than forwarded to a real backend.
pub const COCO_HOST: &str = "coco";

/// A `(hostname, port)` pair identifying a backend.
///
/// Parsed from `hostname:port`, or from a bare hostname when the port is
/// only discoverable by matching against a set of known hosts (see
/// [`crate::blocklist::Blocklist`]). Two hosts are equal iff both fields
/// match; a host with `port = None` only ever arises as an unresolved probe
/// value and is never stored in a [`Group`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub port: Option<u16>,
}

impl Host {
    /// Construct a fully-specified host.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port: Some(port),
        }
    }

    /// The symbolic `coco` host, used to key local (non-forwarded) results.
    pub fn coco() -> Self {
        Self {
            hostname: COCO_HOST.to_string(),
            port: None,
        }
    }

    /// Parse `"hostname:port"`, a bare `"hostname"`, or a `scheme://hostname:port/...` URL.
    ///
    /// A bare hostname (no colon) parses to a host with `port = None`; it is
    /// the caller's responsibility (typically the blocklist) to resolve it
    /// against known hosts before it is used for forwarding.
    pub fn parse(s: &str) -> Self {
        let stripped = s
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(s);
        let host_part = stripped.split('/').next().unwrap_or(stripped);

        match host_part.rsplit_once(':') {
            Some((hostname, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => Host {
                    hostname: hostname.to_string(),
                    port: Some(port),
                },
                Err(_) => Host {
                    hostname: host_part.to_string(),
                    port: None,
                },
            },
            None => Host {
                hostname: host_part.to_string(),
                port: None,
            },
        }
    }

    pub fn is_coco(&self) -> bool {
        self.hostname == COCO_HOST
    }

    /// Base URL this host should be addressed at, e.g. `http://hostname:port`.
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.hostname, port),
            None => format!("http://{}", self.hostname),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname && self.port == other.port
    }
}
impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.hostname, port),
            None => write!(f, "{}", self.hostname),
        }
    }
}

/// A named, ordered collection of hosts, configured at startup and immutable
/// thereafter. Endpoints reference a group by name as their default fan-out
/// target.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub hosts: Vec<Host>,
}

impl Group {
    pub fn new(name: impl Into<String>, hosts: Vec<Host>) -> Self {
        Self {
            name: name.into(),
            hosts,
        }
    }
}
