use thiserror::Error;

use crate::block::{BlockId, NodeId};

/// Errors surfaced by the dataflow engine to orchestration code.
///
/// Cloneable so a single recorded failure can be handed to every waiter of
/// the failed node and to the barrier that reports it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// A kernel's numerical precondition was violated at execution time.
    #[error("numerical error in {kernel} (node {node}): {reason}")]
    Numerical {
        node: NodeId,
        kernel: String,
        reason: String,
    },

    /// The node never ran because an ancestor failed.
    #[error("node {node} ({kernel}) cancelled: ancestor node {cause} failed")]
    Cancelled {
        node: NodeId,
        kernel: String,
        cause: NodeId,
    },

    /// Orchestration code broke an engine invariant (bad arity, stale handle,
    /// aliased operands, read of an unwritten block).
    #[error("dependency violation: {0}")]
    DependencyViolation(String),

    #[error("block {block} version {version} was superseded by version {latest}")]
    Superseded {
        block: BlockId,
        version: u64,
        latest: u64,
    },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("scheduler is shut down")]
    ShutDown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FlowError {
    /// True for nodes that were never attempted.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FlowError::Cancelled { .. })
    }

    /// The node this error is attached to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            FlowError::Numerical { node, .. } | FlowError::Cancelled { node, .. } => Some(*node),
            _ => None,
        }
    }
}
