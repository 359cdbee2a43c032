use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilegraph_core::Block;

use crate::algorithms::{gemm, generate, potrf, trsm, KernelError};

/// Kernel family, used for metrics and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    Generate,
    Warmup,
    Potrf,
    Trsm,
    Gemm,
}

impl KernelKind {
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::Generate => "generate_block",
            KernelKind::Warmup => "warmup",
            KernelKind::Potrf => "potrf",
            KernelKind::Trsm => "trsm",
            KernelKind::Gemm => "gemm",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a kernel's result lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRole {
    /// A new block slot of the given dimension.
    Fresh { dim: usize },
    /// Operand `i` is read and is the node's only write target.
    InPlace(usize),
}

/// Declared operand/output contract of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelContract {
    pub arity: usize,
    pub output: OutputRole,
}

impl KernelContract {
    /// Index of the in-place operand, if any.
    pub fn in_place(&self) -> Option<usize> {
        match self.output {
            OutputRole::InPlace(i) => Some(i),
            OutputRole::Fresh { .. } => None,
        }
    }
}

/// One block-level operation together with its scalar parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// Random symmetric block; diagonal blocks are biased to be positive definite.
    Generate { dim: usize, diagonal: bool, seed: u64 },
    /// Sleeps; used to warm up the worker pool.
    Warmup { duration: Duration },
    /// Operands `[A]`: `A ← chol(A)`.
    Potrf,
    /// Operands `[L, B]`: `B ← B·L⁻ᵗ`.
    Trsm,
    /// Operands `[A, B, C]`: `C ← alpha·A·Bᵗ + beta·C`.
    Gemm { alpha: f64, beta: f64 },
}

impl Kernel {
    pub fn kind(&self) -> KernelKind {
        match self {
            Kernel::Generate { .. } => KernelKind::Generate,
            Kernel::Warmup { .. } => KernelKind::Warmup,
            Kernel::Potrf => KernelKind::Potrf,
            Kernel::Trsm => KernelKind::Trsm,
            Kernel::Gemm { .. } => KernelKind::Gemm,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn contract(&self) -> KernelContract {
        match self {
            Kernel::Generate { dim, .. } => KernelContract {
                arity: 0,
                output: OutputRole::Fresh { dim: *dim },
            },
            Kernel::Warmup { .. } => KernelContract {
                arity: 0,
                output: OutputRole::Fresh { dim: 0 },
            },
            Kernel::Potrf => KernelContract {
                arity: 1,
                output: OutputRole::InPlace(0),
            },
            Kernel::Trsm => KernelContract {
                arity: 2,
                output: OutputRole::InPlace(1),
            },
            Kernel::Gemm { .. } => KernelContract {
                arity: 3,
                output: OutputRole::InPlace(2),
            },
        }
    }

    /// Run the kernel body.
    ///
    /// `reads` holds the read-only operands in declaration order with the
    /// in-place operand removed; `target` is the in-place operand or, for
    /// fresh outputs, an empty block to overwrite.
    pub(crate) fn execute(&self, reads: &[&Block], target: &mut Block) -> Result<(), KernelError> {
        match self {
            Kernel::Generate { dim, diagonal, seed } => {
                *target = generate::generate_block(*dim, *diagonal, *seed);
                Ok(())
            }
            Kernel::Warmup { duration } => {
                std::thread::sleep(*duration);
                Ok(())
            }
            Kernel::Potrf => potrf::potrf(target),
            Kernel::Trsm => trsm::trsm(reads[0], target),
            Kernel::Gemm { alpha, beta } => gemm::gemm_nt(*alpha, reads[0], reads[1], *beta, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contracts_match_operand_roles() {
        assert_eq!(Kernel::Potrf.contract().in_place(), Some(0));
        assert_eq!(Kernel::Trsm.contract().arity, 2);
        assert_eq!(Kernel::Trsm.contract().in_place(), Some(1));
        let gemm = Kernel::Gemm { alpha: -1.0, beta: 1.0 }.contract();
        assert_eq!(gemm.arity, 3);
        assert_eq!(gemm.in_place(), Some(2));
        let generate = Kernel::Generate { dim: 4, diagonal: true, seed: 0 }.contract();
        assert_eq!(generate.arity, 0);
        assert_eq!(generate.output, OutputRole::Fresh { dim: 4 });
    }

    #[test]
    fn execute_dispatches_to_body() {
        let mut target = Block::zeros(0);
        Kernel::Generate { dim: 3, diagonal: true, seed: 9 }
            .execute(&[], &mut target)
            .unwrap();
        assert_eq!(target.dim(), 3);

        let l = Block::identity(3);
        let before = Block::from_fn(3, |r, c| (r + c) as f64);
        let mut b = before.clone();
        Kernel::Trsm.execute(&[&l], &mut b).unwrap();
        assert_eq!(b, before);

        let mut c = Block::identity(3);
        Kernel::Gemm { alpha: -1.0, beta: 1.0 }
            .execute(&[&l, &l], &mut c)
            .unwrap();
        assert_eq!(c, Block::zeros(3));
    }

    #[test]
    fn potrf_failure_surfaces_as_kernel_error() {
        let mut a = Block::from_fn(2, |r, c| if r == c { -1.0 } else { 0.0 });
        let err = Kernel::Potrf.execute(&[], &mut a).unwrap_err();
        assert!(matches!(err, KernelError::NotPositiveDefinite { .. }));
    }

    #[test]
    fn kind_names() {
        assert_eq!(Kernel::Potrf.name(), "potrf");
        assert_eq!(KernelKind::Generate.to_string(), "generate_block");
    }
}
