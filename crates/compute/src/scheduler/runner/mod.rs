//! Scheduler runner -- worker pool, graph building, and synchronization.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, construction, shutdown, and accessor methods
//! - `submission`: kernel submission and dependency linking on the caller's thread
//! - `execution`: worker loop and kernel dispatch
//! - `barrier`: barriers and handle resolution

mod barrier;
mod core;
mod execution;
mod submission;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
