//! Dataflow scheduler for block kernels.
//!
//! Callers submit [`Kernel`] invocations over [`BlockHandle`]s and get a
//! handle to the output back immediately. The scheduler derives dependency
//! edges from block accesses ([`graph`]), runs ready nodes on a fixed worker
//! pool where each kernel gets its own thread budget, and reports failures at
//! [`Scheduler::barrier`] or [`Scheduler::wait`].

pub mod graph;
pub mod handle;
pub mod metrics;
pub mod runner;
pub(crate) mod state;
pub mod task;
pub mod types;

pub use graph::{Access, HazardTracker};
pub use handle::BlockHandle;
pub use metrics::SchedulerMetrics;
pub use runner::Scheduler;
pub use task::{Kernel, KernelContract, KernelKind, OutputRole};
pub use types::{ExecutionSpan, ExecutionTrace, NodeStatus, SchedulerConfig};
