//! Per-block hazard tracking: turns a stream of block accesses into
//! dependency edges.
//!
//! For every block the tracker remembers its latest writer and every reader
//! issued since that write. A new access then depends on:
//! - the latest writer, for reads (read-after-write) and writes (write-after-write);
//! - every reader since the latest writer, for writes (write-after-read).
//!
//! Each write bumps the block's logical version.
//!
//! Entries hold only a weak reference to the block's storage, so a block
//! nobody holds a handle to can be forgotten by [`HazardTracker::prune`].

use std::collections::HashMap;
use std::sync::Weak;

use tilegraph_core::{BlockId, NodeId};

use super::handle::{BlockHandle, BlockSlot};

/// How a node touches one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    /// Read and written by the same node (in-place kernels). Tracked as a
    /// single write hazard since the node is its own only reader.
    ReadWrite,
}

impl Access {
    pub fn writes(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }

    fn merge(self, other: Access) -> Access {
        match (self, other) {
            (Access::Read, Access::Read) => Access::Read,
            (Access::Write, Access::Write) => Access::Write,
            _ => Access::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BlockHazards {
    version: u64,
    last_writer: Option<NodeId>,
    readers: Vec<NodeId>,
    slot: Weak<BlockSlot>,
}

#[derive(Debug, Default)]
pub struct HazardTracker {
    blocks: HashMap<BlockId, BlockHazards>,
}

impl HazardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest logical version of `block`, or `None` if never seen.
    pub fn version_of(&self, block: BlockId) -> Option<u64> {
        self.blocks.get(&block).map(|h| h.version)
    }

    /// Return the version the tracker holds for `handle`'s block, starting
    /// to track it if it is unknown.
    ///
    /// Only initial values (no producer, version 0) can be adopted. A handle
    /// with a producer that this tracker never registered came from another
    /// scheduler, and `None` is returned.
    pub fn adopt(&mut self, handle: &BlockHandle) -> Option<u64> {
        if let Some(hazards) = self.blocks.get(&handle.id()) {
            return Some(hazards.version);
        }
        if handle.producer().is_some() || handle.version() != 0 {
            return None;
        }
        self.blocks.insert(
            handle.id(),
            BlockHazards {
                slot: handle.downgrade(),
                ..BlockHazards::default()
            },
        );
        Some(0)
    }

    /// Register `node`'s accesses and return its predecessors, sorted and
    /// deduplicated. Repeated accesses to one block are merged first.
    pub fn register(&mut self, node: NodeId, accesses: &[(BlockId, Access)]) -> Vec<NodeId> {
        let mut merged: Vec<(BlockId, Access)> = Vec::with_capacity(accesses.len());
        for &(block, access) in accesses {
            match merged.iter_mut().find(|(b, _)| *b == block) {
                Some(entry) => entry.1 = entry.1.merge(access),
                None => merged.push((block, access)),
            }
        }

        let mut preds = Vec::new();
        for (block, access) in merged {
            let hazards = self.blocks.entry(block).or_default();
            preds.extend(hazards.last_writer);
            if access.writes() {
                preds.extend(hazards.readers.drain(..));
                hazards.last_writer = Some(node);
                hazards.version += 1;
            } else {
                hazards.readers.push(node);
            }
        }

        preds.retain(|&p| p != node);
        preds.sort_unstable();
        preds.dedup();
        preds
    }

    /// Forget blocks no handle refers to any more, and drop `finished`
    /// nodes from the remaining entries. Returns how many blocks were
    /// forgotten.
    ///
    /// Finished nodes can never be predecessors again, so dropping them
    /// changes no future edge. Failed nodes must not count as finished:
    /// later readers still need them to be cancelled.
    pub fn prune(&mut self, finished: impl Fn(NodeId) -> bool) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|_, h| h.slot.strong_count() > 0);
        for hazards in self.blocks.values_mut() {
            hazards.readers.retain(|&r| !finished(r));
            if hazards.last_writer.is_some_and(&finished) {
                hazards.last_writer = None;
            }
        }
        before - self.blocks.len()
    }

    pub fn tracked_blocks(&self) -> usize {
        self.blocks.len()
    }
}
