pub mod algorithms;
pub mod cholesky;
pub mod matrix;
pub mod report;
pub mod scheduler;

pub use algorithms::KernelError;
pub use cholesky::{RunError, RunOutcome, cholesky_blocked, factorize};
pub use matrix::BlockMatrix;
pub use report::{FileSink, JsonLinesSink, LogSink, PhaseTimings, ReportError, RunReport, TimingSink};
pub use scheduler::{BlockHandle, Kernel, Scheduler, SchedulerConfig, SchedulerMetrics};
