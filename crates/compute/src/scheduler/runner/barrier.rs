use std::sync::MutexGuard;

use tilegraph_core::{Block, FlowError, NodeId};
use tracing::{debug, warn};

use crate::scheduler::handle::BlockHandle;
use crate::scheduler::state::GraphState;

use super::Scheduler;

impl Scheduler {
    /// Block until every node submitted before this call is done or failed.
    ///
    /// Raises one representative failure among those nodes (the earliest
    /// kernel failure, else the earliest cancellation). Each failure is
    /// raised by at most one barrier.
    pub fn barrier(&self) -> Result<(), FlowError> {
        self.barrier_scoped(None)
    }

    /// [`barrier`](Self::barrier) restricted to nodes submitted with
    /// [`submit_in`](Self::submit_in) under `group`.
    pub fn barrier_group(&self, group: &str) -> Result<(), FlowError> {
        self.barrier_scoped(Some(group))
    }

    /// Resolve a handle: wait for its producer, then return a copy of the block.
    ///
    /// Raises the producer's failure if it failed or was cancelled, and
    /// `Superseded` if a later submission has rewritten the block.
    pub fn wait(&self, handle: &BlockHandle) -> Result<Block, FlowError> {
        {
            let mut state = self.shared.lock()?;
            check_current(&state, handle)?;
            if let Some(producer) = handle.producer() {
                while state.live.contains_key(&producer) {
                    state = self.wait_progress(state)?;
                }
                if let Some(err) = state.failed.get(&producer) {
                    return Err(err.clone());
                }
            }
        }

        let data = handle.slot().read()?;
        if data.version != handle.version() {
            return Err(FlowError::Superseded {
                block: handle.id(),
                version: handle.version(),
                latest: data.version,
            });
        }
        data.block.clone().ok_or_else(|| {
            FlowError::DependencyViolation(format!("block {} has no value", handle.id()))
        })
    }

    fn barrier_scoped(&self, group: Option<&str>) -> Result<(), FlowError> {
        let failures = {
            let mut state = self.shared.lock()?;
            let watermark = state.next_node;
            while state.has_outstanding(watermark, group) {
                state = self.wait_progress(state)?;
            }
            let forgotten = state.prune_hazards();
            if forgotten > 0 {
                debug!(forgotten, tracked = state.hazards.tracked_blocks(), "hazard entries pruned");
            }
            state.take_failures(watermark, group)
        };
        debug!(group = group.unwrap_or("*"), failures = failures.len(), "barrier passed");
        representative(failures)
    }

    fn wait_progress<'a>(
        &'a self,
        state: MutexGuard<'a, GraphState>,
    ) -> Result<MutexGuard<'a, GraphState>, FlowError> {
        self.shared
            .progress
            .wait(state)
            .map_err(|e| FlowError::LockPoisoned(format!("graph state: {}", e)))
    }
}

fn check_current(state: &GraphState, handle: &BlockHandle) -> Result<(), FlowError> {
    match state.hazards.version_of(handle.id()) {
        Some(latest) if latest > handle.version() => Err(FlowError::Superseded {
            block: handle.id(),
            version: handle.version(),
            latest,
        }),
        Some(_) => Ok(()),
        None if handle.producer().is_none() && handle.version() == 0 => Ok(()),
        None => Err(FlowError::DependencyViolation(format!(
            "block {} version {} was produced by node {:?} of another scheduler",
            handle.id(),
            handle.version(),
            handle.producer()
        ))),
    }
}

fn representative(failures: Vec<(NodeId, FlowError)>) -> Result<(), FlowError> {
    if failures.is_empty() {
        return Ok(());
    }
    if failures.len() > 1 {
        let cancelled = failures.iter().filter(|(_, e)| e.is_cancellation()).count();
        warn!(
            failed = failures.len() - cancelled,
            cancelled, "barrier observed multiple failures; raising the earliest"
        );
    }
    let pick = failures
        .iter()
        .position(|(_, e)| !e.is_cancellation())
        .unwrap_or(0);
    failures.into_iter().nth(pick).map_or(Ok(()), |(_, e)| Err(e))
}
