use std::time::Duration;

use tilegraph_core::{BlockId, FlowError, NodeId};
use tracing::{debug, warn};

use crate::scheduler::graph::Access;
use crate::scheduler::handle::BlockHandle;
use crate::scheduler::state::NodeRecord;
use crate::scheduler::task::{Kernel, OutputRole};
use crate::scheduler::types::NodeStatus;

use super::Scheduler;

impl Scheduler {
    /// Submit a kernel invocation and return the handle of its output.
    ///
    /// Never waits for other nodes: the node is linked to its unfinished
    /// predecessors and queued once they are done. Returns
    /// `DependencyViolation` for operands that break the kernel's contract
    /// (arity, dimensions, aliasing, stale versions).
    pub fn submit(&self, kernel: Kernel, operands: &[&BlockHandle]) -> Result<BlockHandle, FlowError> {
        self.submit_to(None, kernel, operands)
    }

    /// Like [`submit`](Self::submit), tagging the node with `group` so
    /// [`barrier_group`](Self::barrier_group) can wait for it selectively.
    pub fn submit_in(
        &self,
        group: &str,
        kernel: Kernel,
        operands: &[&BlockHandle],
    ) -> Result<BlockHandle, FlowError> {
        self.submit_to(Some(group), kernel, operands)
    }

    pub fn generate(&self, dim: usize, diagonal: bool, seed: u64) -> Result<BlockHandle, FlowError> {
        self.submit(Kernel::Generate { dim, diagonal, seed }, &[])
    }

    pub fn warmup(&self, duration: Duration) -> Result<BlockHandle, FlowError> {
        self.submit(Kernel::Warmup { duration }, &[])
    }

    pub fn potrf(&self, a: &BlockHandle) -> Result<BlockHandle, FlowError> {
        self.submit(Kernel::Potrf, &[a])
    }

    pub fn trsm(&self, l: &BlockHandle, b: &BlockHandle) -> Result<BlockHandle, FlowError> {
        self.submit(Kernel::Trsm, &[l, b])
    }

    pub fn gemm(
        &self,
        alpha: f64,
        a: &BlockHandle,
        b: &BlockHandle,
        c: &BlockHandle,
        beta: f64,
    ) -> Result<BlockHandle, FlowError> {
        self.submit(Kernel::Gemm { alpha, beta }, &[a, b, c])
    }

    fn submit_to(
        &self,
        group: Option<&str>,
        kernel: Kernel,
        operands: &[&BlockHandle],
    ) -> Result<BlockHandle, FlowError> {
        let contract = kernel.contract();
        check_operands(&kernel, operands)?;

        let mut state = self.shared.lock()?;
        if state.shutdown {
            return Err(FlowError::ShutDown);
        }

        for op in operands {
            let Some(latest) = state.hazards.adopt(op) else {
                return Err(FlowError::DependencyViolation(format!(
                    "{} given block {} version {} produced by node {:?}, which this scheduler never registered",
                    kernel.name(),
                    op.id(),
                    op.version(),
                    op.producer()
                )));
            };
            if latest != op.version() {
                return Err(FlowError::DependencyViolation(format!(
                    "{} given stale handle: block {} version {} (latest {})",
                    kernel.name(),
                    op.id(),
                    op.version(),
                    latest
                )));
            }
        }

        let node = state.allocate_node();
        let (target, accesses): (BlockHandle, Vec<(BlockId, Access)>) = match contract.output {
            OutputRole::Fresh { dim } => {
                let fresh = BlockHandle::unwritten(dim);
                state.hazards.adopt(&fresh);
                let mut accesses: Vec<_> = operands.iter().map(|op| (op.id(), Access::Read)).collect();
                accesses.push((fresh.id(), Access::Write));
                (fresh, accesses)
            }
            OutputRole::InPlace(i) => {
                let accesses = operands
                    .iter()
                    .enumerate()
                    .map(|(j, op)| (op.id(), if j == i { Access::ReadWrite } else { Access::Read }))
                    .collect();
                (operands[i].clone(), accesses)
            }
        };
        let preds = state.hazards.register(node, &accesses);
        let version = state.hazards.version_of(target.id()).unwrap_or(1);
        let output = target.advanced(version, node);

        // A failed predecessor means this node can never run.
        let failed_cause = preds.iter().copied().find(|p| state.failed.contains_key(p));
        let group = group.map(str::to_string);

        if let Some(cause) = failed_cause {
            warn!(node, kernel = kernel.name(), cause, "submitted after an ancestor failed; cancelled");
            let error = FlowError::Cancelled {
                node,
                kernel: kernel.name().to_string(),
                cause,
            };
            state.record_failure(node, error, group);
            drop(state);
            if let Ok(mut m) = self.shared.metrics.write() {
                m.nodes_submitted += 1;
                m.nodes_cancelled += 1;
            }
            self.shared.progress.notify_all();
            return Ok(output);
        }

        let live_preds: Vec<NodeId> = preds
            .into_iter()
            .filter(|p| state.live.contains_key(p))
            .collect();
        for p in &live_preds {
            if let Some(pred) = state.live.get_mut(p) {
                pred.dependents.push(node);
            }
        }
        if let Some(trace) = state.trace.as_mut() {
            trace.edges.extend(live_preds.iter().map(|&p| (p, node)));
        }

        let ready = live_preds.is_empty();
        state.insert_live(
            node,
            NodeRecord {
                kernel,
                operands: operands.iter().map(|op| (*op).clone()).collect(),
                output: output.clone(),
                status: NodeStatus::Pending,
                unresolved: live_preds.len(),
                dependents: Vec::new(),
                group,
            },
        );
        drop(state);

        debug!(node, preds = live_preds.len(), ready, "node submitted");
        if let Ok(mut m) = self.shared.metrics.write() {
            m.nodes_submitted += 1;
        }
        if ready {
            self.shared.work.notify_one();
        }
        Ok(output)
    }
}

/// Contract checks that need no engine state.
fn check_operands(kernel: &Kernel, operands: &[&BlockHandle]) -> Result<(), FlowError> {
    let contract = kernel.contract();
    if operands.len() != contract.arity {
        return Err(FlowError::DependencyViolation(format!(
            "{} takes {} operands, got {}",
            kernel.name(),
            contract.arity,
            operands.len()
        )));
    }
    if let Some(first) = operands.first() {
        if let Some(op) = operands.iter().find(|op| op.dim() != first.dim()) {
            return Err(FlowError::DependencyViolation(format!(
                "{} operands disagree on block size: {} vs {}",
                kernel.name(),
                first.dim(),
                op.dim()
            )));
        }
    }
    if let Some(i) = contract.in_place() {
        let target = operands[i];
        let aliased = operands
            .iter()
            .enumerate()
            .any(|(j, op)| j != i && op.same_block(target));
        if aliased {
            return Err(FlowError::DependencyViolation(format!(
                "{} in-place operand {} aliases another operand",
                kernel.name(),
                target.id()
            )));
        }
    }
    Ok(())
}
