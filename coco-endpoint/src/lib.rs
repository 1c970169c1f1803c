//! Endpoint descriptors and the execution engine that runs the
//! before → forward → forward-to-coco → state-effects → after → get-state
//! chain for a single invocation.

pub mod descriptor;
pub mod engine;
pub mod registry;

pub use descriptor::{ChainStep, Endpoint, ValuesSchema};
pub use engine::EndpointEngine;
pub use registry::{EndpointRegistry, BUILTIN_ENDPOINTS};
