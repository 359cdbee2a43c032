use rayon::prelude::*;
use tilegraph_core::Block;

use super::{check_dim, KernelError};

/// `C ← alpha·A·Bᵗ + beta·C`, updating `c` in place.
///
/// With `B` transposed each output element is a dot product of two rows,
/// which keeps both operands in row-major stride order. Rows of `C` are
/// computed in parallel.
pub fn gemm_nt(alpha: f64, a: &Block, b: &Block, beta: f64, c: &mut Block) -> Result<(), KernelError> {
    let n = c.dim();
    check_dim(n, a.dim())?;
    check_dim(n, b.dim())?;

    c.as_mut_slice()
        .par_chunks_mut(n.max(1))
        .enumerate()
        .for_each(|(i, c_row)| {
            let a_row = a.row(i);
            for (j, c_ij) in c_row.iter_mut().enumerate() {
                let dot: f64 = a_row.iter().zip(b.row(j)).map(|(x, y)| x * y).sum();
                *c_ij = alpha * dot + beta * *c_ij;
            }
        });
    Ok(())
}
