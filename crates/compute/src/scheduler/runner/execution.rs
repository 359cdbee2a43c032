use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLockReadGuard};
use std::time::Instant;

use rayon::ThreadPool;
use tilegraph_core::{Block, BlockId, FlowError, NodeId};
use tracing::{debug, error, warn};

use crate::algorithms::KernelError;
use crate::scheduler::handle::{BlockHandle, SlotData};
use crate::scheduler::task::Kernel;
use crate::scheduler::types::{ExecutionSpan, NodeStatus};

use super::core::Shared;

/// A node claimed by a worker.
struct Job {
    node: NodeId,
    kernel: Kernel,
    operands: Vec<BlockHandle>,
    output: BlockHandle,
}

/// Worker thread body: claim ready nodes until shutdown.
pub(super) fn worker_loop(shared: Arc<Shared>, index: usize, pool: ThreadPool) {
    debug!(worker = index, "worker started");
    while let Some(job) = next_job(&shared) {
        run_job(&shared, index, &pool, job);
    }
    debug!(worker = index, "worker exiting");
}

/// Block until a ready node is available. `None` on shutdown.
fn next_job(shared: &Shared) -> Option<Job> {
    let mut state = match shared.lock() {
        Ok(state) => state,
        Err(e) => {
            error!("worker cannot lock graph state: {}", e);
            return None;
        }
    };
    loop {
        if state.shutdown {
            return None;
        }
        while let Some(node) = state.ready.pop_front() {
            // Cancellation is checked here, before dispatch.
            let Some(record) = state.live.get_mut(&node) else {
                continue;
            };
            if record.status != NodeStatus::Ready {
                continue;
            }
            record.status = NodeStatus::Running;
            return Some(Job {
                node,
                kernel: record.kernel.clone(),
                operands: record.operands.clone(),
                output: record.output.clone(),
            });
        }
        state = match shared.work.wait(state) {
            Ok(state) => state,
            Err(e) => {
                error!("worker cannot wait on graph state: {}", e);
                return None;
            }
        };
    }
}

fn run_job(shared: &Shared, worker: usize, pool: &ThreadPool, job: Job) {
    let kernel = job.kernel.name();
    debug!(node = job.node, kernel, worker, "dispatching node");
    if let Ok(mut m) = shared.metrics.write() {
        m.record_start();
    }

    let started = Instant::now();
    let result = pool.install(|| {
        panic::catch_unwind(AssertUnwindSafe(|| execute_node(&job))).unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(FlowError::Numerical {
                node: job.node,
                kernel: kernel.to_string(),
                reason: format!("kernel panicked: {}", reason),
            })
        })
    });
    let finished = Instant::now();
    let (node, kind) = (job.node, job.kernel.kind());
    // Handles go before the node retires; a barrier may prune their blocks.
    drop(job);

    if let Ok(mut m) = shared.metrics.write() {
        match &result {
            Ok(()) => m.record_execution(kernel, finished - started),
            Err(_) => m.record_failure(kernel),
        }
    }

    let mut state = match shared.lock() {
        Ok(state) => state,
        Err(e) => {
            error!(node, "cannot retire node: {}", e);
            return;
        }
    };
    if let Some(trace) = state.trace.as_mut() {
        trace.spans.insert(
            node,
            ExecutionSpan {
                kernel: kind,
                worker,
                started,
                finished,
            },
        );
    }

    match result {
        Ok(()) => {
            let released = state.complete(node);
            drop(state);
            debug!(node, kernel, released, "node done");
            if released > 0 {
                shared.work.notify_all();
            }
        }
        Err(err) => {
            if matches!(err, FlowError::DependencyViolation(_) | FlowError::LockPoisoned(_)) {
                error!(node, kernel, "engine invariant broken: {}", err);
            } else {
                warn!(node, kernel, "kernel failed: {}", err);
            }
            let cancelled = state.fail(node, err);
            if cancelled > 0 {
                warn!(node, cancelled, "cancelled dependent nodes");
                if let Ok(mut m) = shared.metrics.write() {
                    m.nodes_cancelled += cancelled as u64;
                }
            }
            drop(state);
        }
    }
    shared.progress.notify_all();
}

/// Run the kernel of one node against its operand storage.
///
/// Read operands are locked shared, each distinct block once (the
/// diagonal trailing update reads one block twice). The in-place or fresh
/// output is locked exclusively; submission guarantees it aliases no read.
fn execute_node(job: &Job) -> Result<(), FlowError> {
    let target = job.kernel.contract().in_place();

    let mut guards: Vec<(BlockId, RwLockReadGuard<'_, SlotData>)> = Vec::new();
    for (i, op) in job.operands.iter().enumerate() {
        if Some(i) == target || guards.iter().any(|(id, _)| *id == op.id()) {
            continue;
        }
        guards.push((op.id(), op.slot().read()?));
    }

    let mut reads: Vec<&Block> = Vec::with_capacity(guards.len());
    for (i, op) in job.operands.iter().enumerate() {
        if Some(i) == target {
            continue;
        }
        let block = guards
            .iter()
            .find(|(id, _)| *id == op.id())
            .and_then(|(_, guard)| guard.block.as_ref())
            .ok_or_else(|| unwritten(job.node, op))?;
        reads.push(block);
    }

    let numerical = |e: KernelError| FlowError::Numerical {
        node: job.node,
        kernel: job.kernel.name().to_string(),
        reason: e.to_string(),
    };

    match target {
        Some(i) => {
            let operand = &job.operands[i];
            let mut slot = operand.slot().write()?;
            let block = slot.block.as_mut().ok_or_else(|| unwritten(job.node, operand))?;
            job.kernel.execute(&reads, block).map_err(numerical)?;
            slot.version = job.output.version();
        }
        None => {
            let mut block = Block::zeros(0);
            job.kernel.execute(&reads, &mut block).map_err(numerical)?;
            let mut slot = job.output.slot().write()?;
            slot.block = Some(block);
            slot.version = job.output.version();
        }
    }
    Ok(())
}

fn unwritten(node: NodeId, handle: &BlockHandle) -> FlowError {
    FlowError::DependencyViolation(format!(
        "node {} read block {} before any writer produced it",
        node,
        handle.id()
    ))
}
