//! Core domain types shared across Coco: the error taxonomy, host/group
//! model, hierarchical state store, dynamic blocklist and configuration.

pub mod blocklist;
pub mod config;
pub mod error;
pub mod host;
pub mod state;

pub use blocklist::Blocklist;
pub use config::{CocoConfig, EndpointConfig};
pub use error::CocoError;
pub use host::{Group, Host, COCO_HOST};
pub use state::State;
