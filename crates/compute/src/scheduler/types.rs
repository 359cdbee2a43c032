use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tilegraph_core::{FlowError, NodeId};

use super::task::KernelKind;

/// Lifecycle of one node.
///
/// `Pending → Ready → Running → {Done, Failed}`, plus `Pending → Failed`
/// for cancelled dependents. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Waiting on at least one unfinished predecessor.
    Pending,
    /// All predecessors done; queued for a worker.
    Ready,
    /// Claimed by a worker.
    Running,
    Done,
    /// Kernel failed, or the node was cancelled because an ancestor failed.
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Failed)
    }
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Thread budget of each running kernel.
    #[serde(default = "default_kernel_threads")]
    pub kernel_threads: usize,
    /// Record per-node execution spans and dependency edges.
    #[serde(default)]
    pub record_trace: bool,
}

fn default_worker_threads() -> usize { 0 }
fn default_kernel_threads() -> usize { 1 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            kernel_threads: default_kernel_threads(),
            record_trace: false,
        }
    }
}

impl SchedulerConfig {
    /// Config with an explicit worker count and default kernel budget.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Parse from a TOML string. Missing keys take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, FlowError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| FlowError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.kernel_threads == 0 {
            return Err(FlowError::InvalidConfig("kernel_threads must be positive".into()));
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Threads the pool may keep busy at once: workers times kernel budget.
    /// Callers should keep this at or below the hardware concurrency.
    pub fn peak_threads(&self) -> usize {
        self.resolved_worker_threads() * self.kernel_threads
    }
}

/// When and where one node's kernel ran.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSpan {
    pub kernel: KernelKind,
    pub worker: usize,
    pub started: Instant,
    pub finished: Instant,
}

/// Opt-in record of executed nodes and builder-created edges.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    pub spans: HashMap<NodeId, ExecutionSpan>,
    /// `(predecessor, successor)` pairs linking unfinished nodes at submission.
    pub edges: Vec<(NodeId, NodeId)>,
}

impl ExecutionTrace {
    /// Edges whose successor started before its predecessor finished.
    pub fn ordering_violations(&self) -> Vec<(NodeId, NodeId)> {
        self.edges
            .iter()
            .copied()
            .filter(|(pred, succ)| match (self.spans.get(pred), self.spans.get(succ)) {
                (Some(p), Some(s)) => s.started < p.finished,
                _ => false,
            })
            .collect()
    }
}
