//! The worker side of Coco: drains the queue through the endpoint engine,
//! and drives `call_on_start` and `schedule.period` invocations.

pub mod scheduler;
pub mod worker;

pub use scheduler::{run_call_on_start, spawn_scheduled};
pub use worker::Worker;
