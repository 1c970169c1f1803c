//! The persistent FIFO queue and the rendezvous it uses to hand a worker's
//! result back to the frontend handler that enqueued the request.

pub mod queue;

pub use queue::{InMemoryQueue, Queue, QueueEntry, QueueResult, SHUTDOWN_KEY};
