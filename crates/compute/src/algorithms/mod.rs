//! Dense numerical bodies of the block kernels.
//!
//! Every function operates on whole [`Block`](tilegraph_core::Block)s and
//! parallelizes internally with rayon, so the caller decides the thread
//! budget by choosing which pool the call runs in.

pub mod gemm;
pub mod generate;
pub mod potrf;
pub mod trsm;

/// Numerical failure raised by a kernel body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("matrix is not positive definite (column {column}, pivot {pivot})")]
    NotPositiveDefinite { column: usize, pivot: f64 },
    #[error("triangular factor is singular at row {row}")]
    Singular { row: usize },
    #[error("block dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

pub(crate) fn check_dim(expected: usize, found: usize) -> Result<(), KernelError> {
    if expected == found {
        Ok(())
    } else {
        Err(KernelError::DimensionMismatch { expected, found })
    }
}
