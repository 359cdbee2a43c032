use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tilegraph_core::{Block, BlockId, FlowError, NodeId};

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Storage behind a slot together with the version last written into it.
#[derive(Debug)]
pub(crate) struct SlotData {
    pub block: Option<Block>,
    pub version: u64,
}

/// One block's storage. Shared by every handle (version) of that block.
#[derive(Debug)]
pub(crate) struct BlockSlot {
    id: BlockId,
    dim: usize,
    data: RwLock<SlotData>,
}

impl BlockSlot {
    fn new(dim: usize, block: Option<Block>) -> Self {
        Self {
            id: NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed),
            dim,
            data: RwLock::new(SlotData { block, version: 0 }),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, SlotData>, FlowError> {
        self.data
            .read()
            .map_err(|e| FlowError::LockPoisoned(format!("block {} read lock: {}", self.id, e)))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, SlotData>, FlowError> {
        self.data
            .write()
            .map_err(|e| FlowError::LockPoisoned(format!("block {} write lock: {}", self.id, e)))
    }
}

/// Future-like reference to one version of a block.
///
/// Submitting a kernel returns a handle immediately; its value exists once
/// the producing node is done. Resolve it with
/// [`Scheduler::wait`](crate::scheduler::Scheduler::wait). Every write-kind
/// submission yields a handle with a fresh version, and older handles to the
/// same block become stale for further submissions.
#[derive(Clone)]
pub struct BlockHandle {
    slot: Arc<BlockSlot>,
    version: u64,
    producer: Option<NodeId>,
}

impl BlockHandle {
    /// Handle to a value that is already available; no node produces it.
    pub fn resolved(block: Block) -> Self {
        let dim = block.dim();
        Self {
            slot: Arc::new(BlockSlot::new(dim, Some(block))),
            version: 0,
            producer: None,
        }
    }

    /// Empty slot that a fresh-output node will fill.
    pub(crate) fn unwritten(dim: usize) -> Self {
        Self {
            slot: Arc::new(BlockSlot::new(dim, None)),
            version: 0,
            producer: None,
        }
    }

    /// The same block at a newer version produced by `producer`.
    pub(crate) fn advanced(&self, version: u64, producer: NodeId) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            version,
            producer: Some(producer),
        }
    }

    pub(crate) fn slot(&self) -> &BlockSlot {
        &self.slot
    }

    pub(crate) fn downgrade(&self) -> Weak<BlockSlot> {
        Arc::downgrade(&self.slot)
    }

    pub fn id(&self) -> BlockId {
        self.slot.id
    }

    pub fn dim(&self) -> usize {
        self.slot.dim
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Node producing this version, `None` for resolved handles.
    pub fn producer(&self) -> Option<NodeId> {
        self.producer
    }

    /// True when both handles refer to the same storage, at any version.
    pub fn same_block(&self, other: &BlockHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("block", &self.slot.id)
            .field("version", &self.version)
            .field("producer", &self.producer)
            .finish()
    }
}
