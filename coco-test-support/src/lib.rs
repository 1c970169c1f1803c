//! Test-only support shared by integration tests: a fake backend farm and
//! an in-process frontend harness.

pub mod farm;
pub mod runner;

pub use farm::{Callback, Farm};
pub use runner::CocoRunner;
