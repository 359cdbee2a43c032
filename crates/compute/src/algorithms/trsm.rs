use rayon::prelude::*;
use tilegraph_core::Block;

use super::{check_dim, KernelError};

/// Right-side triangular solve `B ← B·L⁻ᵗ` for lower-triangular `L`.
///
/// Equivalent to transposing `B`, solving `L·Y = Bᵗ`, and transposing back:
/// row `r` of `B` is column `r` of `Bᵗ`, so each row is an independent
/// forward substitution and rows are solved in parallel.
pub fn trsm(l: &Block, b: &mut Block) -> Result<(), KernelError> {
    let n = l.dim();
    check_dim(n, b.dim())?;
    if let Some(row) = (0..n).find(|&i| l.get(i, i) == 0.0) {
        return Err(KernelError::Singular { row });
    }

    b.as_mut_slice().par_chunks_mut(n.max(1)).for_each(|x| {
        for c in 0..n {
            let l_row = l.row(c);
            let dot: f64 = l_row[..c].iter().zip(&x[..c]).map(|(a, y)| a * y).sum();
            x[c] = (x[c] - dot) / l_row[c];
        }
    });
    Ok(())
}
