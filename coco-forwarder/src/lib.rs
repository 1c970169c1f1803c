//! Concurrent HTTP fan-out to groups of backend hosts, honouring the
//! blocklist and a global session concurrency limit.

pub mod forwarder;
pub mod reply;

pub use forwarder::{parse_timeout, Method, RequestForwarder};
pub use reply::{HostReply, Reply, ReplyShape};
