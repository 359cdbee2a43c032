use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};

use tilegraph_core::{FlowError, NodeId};
use tracing::{debug, info};

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::state::GraphState;
use crate::scheduler::types::{ExecutionTrace, NodeStatus, SchedulerConfig};

use super::execution;

/// State shared between the submitting thread and the workers.
pub(super) struct Shared {
    pub state: Mutex<GraphState>,
    /// Signalled when nodes become ready or on shutdown.
    pub work: Condvar,
    /// Signalled whenever a node reaches a terminal state.
    pub progress: Condvar,
    pub metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl Shared {
    pub fn lock(&self) -> Result<MutexGuard<'_, GraphState>, FlowError> {
        self.state
            .lock()
            .map_err(|e| FlowError::LockPoisoned(format!("graph state: {}", e)))
    }
}

/// Dataflow scheduler. Kernels submitted to it run on a fixed pool of
/// worker threads as soon as the blocks they touch are available.
///
/// Each worker owns a rayon pool of `kernel_threads` threads that the
/// kernel body runs inside, so at most `workers × kernel_threads` threads
/// compute at once.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler and start its workers.
    pub fn new(config: SchedulerConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let num_workers = config.resolved_worker_threads();
        info!(
            "Scheduler starting with {} workers, {} kernel threads each",
            num_workers, config.kernel_threads
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(GraphState::new(config.record_trace)),
            work: Condvar::new(),
            progress: Condvar::new(),
            metrics: Arc::new(RwLock::new(SchedulerMetrics::new(
                num_workers,
                config.kernel_threads,
            ))),
        });

        // Built before spawning so a failure part-way through stops the
        // workers already started (via Drop).
        let mut scheduler = Self {
            config,
            shared,
            workers: Vec::with_capacity(num_workers),
        };

        for index in 0..num_workers {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(scheduler.config.kernel_threads)
                .thread_name(move |i| format!("tilegraph-kernel-{}-{}", index, i))
                .build()
                .map_err(|e| FlowError::InvalidConfig(format!("kernel thread pool: {}", e)))?;
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name(format!("tilegraph-worker-{}", index))
                .spawn(move || execution::worker_loop(shared, index, pool))
                .map_err(|e| FlowError::InvalidConfig(format!("spawn worker {}: {}", index, e)))?;
            scheduler.workers.push(handle);
        }

        Ok(scheduler)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        match self.shared.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Get an Arc to the metrics (for external reads without cloning).
    pub fn metrics_handle(&self) -> Arc<RwLock<SchedulerMetrics>> {
        Arc::clone(&self.shared.metrics)
    }

    /// Current state of `node`, or `None` if no such node was submitted.
    pub fn status(&self, node: NodeId) -> Result<Option<NodeStatus>, FlowError> {
        Ok(self.shared.lock()?.status(node))
    }

    /// Nodes submitted but not yet finished.
    pub fn outstanding(&self) -> Result<usize, FlowError> {
        Ok(self.shared.lock()?.live.len())
    }

    /// Blocks the hazard tracker currently remembers. Entries of blocks no
    /// handle refers to are dropped at the next barrier.
    pub fn tracked_blocks(&self) -> Result<usize, FlowError> {
        Ok(self.shared.lock()?.hazards.tracked_blocks())
    }

    /// Copy of the execution trace, if tracing is enabled.
    pub fn trace(&self) -> Result<Option<ExecutionTrace>, FlowError> {
        Ok(self.shared.lock()?.trace.clone())
    }

    /// Wait for all outstanding work, then stop the workers.
    ///
    /// Failures still unreported are discarded; call
    /// [`barrier`](Self::barrier) first to observe them.
    pub fn shutdown(mut self) -> Result<(), FlowError> {
        info!("Scheduler shutdown requested");
        {
            let mut state = self.shared.lock()?;
            while !state.live.is_empty() {
                state = self
                    .shared
                    .progress
                    .wait(state)
                    .map_err(|e| FlowError::LockPoisoned(format!("graph state: {}", e)))?;
            }
        }
        self.stop_workers();
        Ok(())
    }

    /// Stop workers after their current node. Unstarted nodes never run.
    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        match self.shared.state.lock() {
            Ok(mut state) => state.shutdown = true,
            Err(poisoned) => poisoned.into_inner().shutdown = true,
        }
        self.shared.work.notify_all();
        self.shared.progress.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                debug!("worker thread panicked during shutdown");
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
