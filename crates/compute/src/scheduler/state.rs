use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tilegraph_core::{FlowError, NodeId};

use super::graph::HazardTracker;
use super::handle::BlockHandle;
use super::task::Kernel;
use super::types::{ExecutionTrace, NodeStatus};

/// A node that has not reached a terminal state yet.
#[derive(Debug)]
pub(crate) struct NodeRecord {
    pub kernel: Kernel,
    pub operands: Vec<BlockHandle>,
    pub output: BlockHandle,
    pub status: NodeStatus,
    /// Predecessors that have not finished.
    pub unresolved: usize,
    pub dependents: Vec<NodeId>,
    pub group: Option<String>,
}

/// A failure waiting to be raised by a barrier.
#[derive(Debug)]
pub(crate) struct PendingFailure {
    pub error: FlowError,
    pub group: Option<String>,
}

/// Everything the scheduler mutates under its single lock.
///
/// Live nodes are kept until they retire; done nodes leave no record (any
/// allocated id that is neither live nor failed is done), failed and
/// cancelled nodes keep only their error.
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    pub next_node: NodeId,
    pub live: BTreeMap<NodeId, NodeRecord>,
    pub failed: HashMap<NodeId, FlowError>,
    pub unreported: BTreeMap<NodeId, PendingFailure>,
    pub groups: HashMap<String, BTreeSet<NodeId>>,
    pub hazards: HazardTracker,
    pub ready: VecDeque<NodeId>,
    pub shutdown: bool,
    pub trace: Option<ExecutionTrace>,
}

impl GraphState {
    pub fn new(record_trace: bool) -> Self {
        Self {
            trace: record_trace.then(ExecutionTrace::default),
            ..Self::default()
        }
    }

    pub fn allocate_node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        id
    }

    pub fn status(&self, node: NodeId) -> Option<NodeStatus> {
        if let Some(record) = self.live.get(&node) {
            Some(record.status)
        } else if self.failed.contains_key(&node) {
            Some(NodeStatus::Failed)
        } else if node < self.next_node {
            Some(NodeStatus::Done)
        } else {
            None
        }
    }

    /// Insert a node whose predecessors are all linked already.
    pub fn insert_live(&mut self, node: NodeId, mut record: NodeRecord) {
        if let Some(group) = &record.group {
            self.groups.entry(group.clone()).or_default().insert(node);
        }
        if record.unresolved == 0 {
            record.status = NodeStatus::Ready;
            self.ready.push_back(node);
        }
        self.live.insert(node, record);
    }

    /// Mark `node` done and release its dependents. Returns how many
    /// dependents became ready.
    pub fn complete(&mut self, node: NodeId) -> usize {
        let Some(record) = self.remove_live(node) else {
            return 0;
        };
        let mut released = 0;
        for dep in record.dependents {
            // Dependents cancelled through another predecessor are gone.
            if let Some(dependent) = self.live.get_mut(&dep) {
                dependent.unresolved -= 1;
                if dependent.unresolved == 0 && dependent.status == NodeStatus::Pending {
                    dependent.status = NodeStatus::Ready;
                    self.ready.push_back(dep);
                    released += 1;
                }
            }
        }
        released
    }

    /// Mark `node` failed and cancel everything downstream of it that has
    /// not run. Returns the number of cancelled nodes.
    pub fn fail(&mut self, node: NodeId, error: FlowError) -> usize {
        let Some(record) = self.remove_live(node) else {
            return 0;
        };
        self.record_failure(node, error, record.group);

        let mut cancelled = 0;
        let mut frontier: Vec<(NodeId, NodeId)> =
            record.dependents.into_iter().map(|d| (d, node)).collect();
        while let Some((dep, cause)) = frontier.pop() {
            let Some(dependent) = self.remove_live(dep) else {
                continue;
            };
            let error = FlowError::Cancelled {
                node: dep,
                kernel: dependent.kernel.name().to_string(),
                cause,
            };
            self.record_failure(dep, error, dependent.group);
            frontier.extend(dependent.dependents.into_iter().map(|d| (d, dep)));
            cancelled += 1;
        }
        cancelled
    }

    /// Record a terminal failure for a node that is not live.
    pub fn record_failure(&mut self, node: NodeId, error: FlowError, group: Option<String>) {
        self.failed.insert(node, error.clone());
        self.unreported.insert(node, PendingFailure { error, group });
    }

    /// Whether any node below `watermark` (in `group`, if given) is unfinished.
    pub fn has_outstanding(&self, watermark: NodeId, group: Option<&str>) -> bool {
        match group {
            None => self.live.range(..watermark).next().is_some(),
            Some(name) => self
                .groups
                .get(name)
                .is_some_and(|members| members.range(..watermark).next().is_some()),
        }
    }

    /// Remove and return failures below `watermark` (in `group`, if given),
    /// ordered by node id.
    pub fn take_failures(&mut self, watermark: NodeId, group: Option<&str>) -> Vec<(NodeId, FlowError)> {
        let ids: Vec<NodeId> = self
            .unreported
            .range(..watermark)
            .filter(|(_, f)| group.is_none() || f.group.as_deref() == group)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.unreported.remove(&id).map(|f| (id, f.error)))
            .collect()
    }

    /// Forget hazard entries of dropped blocks and of done nodes. Returns
    /// how many blocks were forgotten.
    pub fn prune_hazards(&mut self) -> usize {
        let (live, failed) = (&self.live, &self.failed);
        self.hazards
            .prune(|node| !live.contains_key(&node) && !failed.contains_key(&node))
    }

    fn remove_live(&mut self, node: NodeId) -> Option<NodeRecord> {
        let record = self.live.remove(&node)?;
        if let Some(group) = &record.group {
            if let Some(members) = self.groups.get_mut(group) {
                members.remove(&node);
                if members.is_empty() {
                    self.groups.remove(group);
                }
            }
        }
        Some(record)
    }
}
