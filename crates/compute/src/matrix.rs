//! Tiled matrix: an `msize × msize` grid of block handles.

use tilegraph_core::{Block, FlowError};
use tracing::debug;

use crate::algorithms::generate::block_seed;
use crate::scheduler::{BlockHandle, Scheduler};

/// Grid of block handles with fixed block size and block count.
///
/// Indices are `(row, col)` in blocks. Out-of-range indices are programming
/// errors and panic.
#[derive(Debug, Clone)]
pub struct BlockMatrix {
    msize: usize,
    bsize: usize,
    seed: u64,
    blocks: Vec<Option<BlockHandle>>,
}

impl BlockMatrix {
    /// Empty grid; every position unset.
    pub fn new(msize: usize, bsize: usize) -> Self {
        Self {
            msize,
            bsize,
            seed: 0,
            blocks: vec![None; msize * msize],
        }
    }

    /// Base seed used by [`generate`](Self::generate).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Submit generation of a full symmetric positive-definite matrix.
    ///
    /// Each lower-triangle block is generated once and shared with its
    /// mirror position in the upper triangle; generated blocks are
    /// symmetric, so the grid describes a symmetric matrix.
    pub fn generate_spd(
        scheduler: &Scheduler,
        msize: usize,
        bsize: usize,
        seed: u64,
    ) -> Result<Self, FlowError> {
        let mut matrix = Self::new(msize, bsize).with_seed(seed);
        for i in 0..msize {
            matrix.generate(scheduler, i, i, true)?;
            for j in (i + 1)..msize {
                let handle = matrix.generate(scheduler, j, i, false)?;
                matrix.set(i, j, handle);
            }
        }
        debug!(msize, bsize, "matrix generation submitted");
        Ok(matrix)
    }

    /// Build a grid of resolved blocks by cutting a dense matrix into tiles.
    ///
    /// Returns `None` unless `bsize` divides the dense dimension.
    pub fn from_dense(dense: &Block, bsize: usize) -> Option<Self> {
        if bsize == 0 || dense.dim() % bsize != 0 {
            return None;
        }
        let msize = dense.dim() / bsize;
        let mut matrix = Self::new(msize, bsize);
        for i in 0..msize {
            for j in 0..msize {
                let tile = Block::from_fn(bsize, |r, c| dense.get(i * bsize + r, j * bsize + c));
                matrix.set(i, j, BlockHandle::resolved(tile));
            }
        }
        Some(matrix)
    }

    pub fn msize(&self) -> usize {
        self.msize
    }

    pub fn bsize(&self) -> usize {
        self.bsize
    }

    /// Submit a generation kernel for block `(i, j)` and store its handle.
    ///
    /// The block's content depends only on the base seed and the unordered
    /// pair `{i, j}`.
    pub fn generate(
        &mut self,
        scheduler: &Scheduler,
        i: usize,
        j: usize,
        is_diagonal: bool,
    ) -> Result<BlockHandle, FlowError> {
        let index = self.index(i, j);
        let seed = block_seed(self.seed, i.max(j), i.min(j));
        let handle = scheduler.generate(self.bsize, is_diagonal, seed)?;
        self.blocks[index] = Some(handle.clone());
        Ok(handle)
    }

    /// Handle at `(i, j)`. Panics when out of range or unset.
    pub fn get(&self, i: usize, j: usize) -> &BlockHandle {
        match self.try_get(i, j) {
            Some(handle) => handle,
            None => panic!("block ({}, {}) of {}x{} grid is unset", i, j, self.msize, self.msize),
        }
    }

    /// Handle at `(i, j)`, `None` if unset. Panics when out of range.
    pub fn try_get(&self, i: usize, j: usize) -> Option<&BlockHandle> {
        self.blocks[self.index(i, j)].as_ref()
    }

    /// Replace the handle at `(i, j)`. Panics when out of range or when the
    /// handle's block size differs from the grid's.
    pub fn set(&mut self, i: usize, j: usize, handle: BlockHandle) {
        assert_eq!(
            handle.dim(),
            self.bsize,
            "block ({}, {}) has size {}, grid uses {}",
            i,
            j,
            handle.dim(),
            self.bsize
        );
        let index = self.index(i, j);
        self.blocks[index] = Some(handle);
    }

    /// Resolved zero block of the grid's block size.
    pub fn zero_block(&self) -> BlockHandle {
        BlockHandle::resolved(Block::zeros(self.bsize))
    }

    /// Wait for every block and copy the grid into one dense matrix.
    /// Unset positions read as zeros.
    pub fn assemble(&self, scheduler: &Scheduler) -> Result<Block, FlowError> {
        let n = self.msize * self.bsize;
        let mut dense = Block::zeros(n);
        for i in 0..self.msize {
            for j in 0..self.msize {
                let Some(handle) = self.try_get(i, j) else {
                    continue;
                };
                let tile = scheduler.wait(handle)?;
                for r in 0..self.bsize {
                    let start = (i * self.bsize + r) * n + j * self.bsize;
                    dense.as_mut_slice()[start..start + self.bsize].copy_from_slice(tile.row(r));
                }
            }
        }
        Ok(dense)
    }

    fn index(&self, i: usize, j: usize) -> usize {
        assert!(
            i < self.msize && j < self.msize,
            "block index ({}, {}) out of range for {}x{} grid",
            i,
            j,
            self.msize,
            self.msize
        );
        i * self.msize + j
    }
}
