use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SchedulerMetrics {
    /// Kernel bodies executed to completion, by kernel name.
    pub kernels_executed: HashMap<String, u64>,
    /// Kernel bodies that returned an error, by kernel name.
    pub kernels_failed: HashMap<String, u64>,
    /// Average kernel duration by kernel name (successful runs).
    pub avg_kernel_duration: HashMap<String, Duration>,
    /// Last completion time by kernel name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Nodes accepted by `submit`.
    pub nodes_submitted: u64,
    /// Nodes cancelled because an ancestor failed.
    pub nodes_cancelled: u64,
    /// Kernels running right now.
    pub running: usize,
    /// Highest number of kernels observed running at once.
    pub peak_running: usize,
    /// Configured graph-level workers.
    pub workers: usize,
    /// Configured thread budget per kernel.
    pub kernel_threads: usize,
}

impl SchedulerMetrics {
    pub fn new(workers: usize, kernel_threads: usize) -> Self {
        Self {
            workers,
            kernel_threads,
            ..Self::default()
        }
    }

    /// A worker picked up a node.
    pub fn record_start(&mut self) {
        self.running += 1;
        self.peak_running = self.peak_running.max(self.running);
    }

    /// Record a successful kernel execution.
    pub fn record_execution(&mut self, kernel: &str, duration: Duration) {
        self.running = self.running.saturating_sub(1);
        *self.kernels_executed.entry(kernel.to_string()).or_default() += 1;
        self.last_run.insert(kernel.to_string(), Utc::now());

        // Update rolling average duration
        let count = self.kernels_executed[kernel];
        let prev_avg = self
            .avg_kernel_duration
            .get(kernel)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_kernel_duration.insert(kernel.to_string(), new_avg);
    }

    /// Record a kernel whose body returned an error.
    pub fn record_failure(&mut self, kernel: &str) {
        self.running = self.running.saturating_sub(1);
        *self.kernels_failed.entry(kernel.to_string()).or_default() += 1;
    }

    pub fn executed(&self, kernel: &str) -> u64 {
        self.kernels_executed.get(kernel).copied().unwrap_or(0)
    }

    /// Executed plus failed bodies; cancelled nodes are not counted.
    pub fn attempted(&self, kernel: &str) -> u64 {
        self.executed(kernel) + self.kernels_failed.get(kernel).copied().unwrap_or(0)
    }

    pub fn total_executed(&self) -> u64 {
        self.kernels_executed.values().sum()
    }
}
