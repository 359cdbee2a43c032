use rayon::prelude::*;
use tilegraph_core::Block;

use super::KernelError;

/// In-place lower Cholesky factorization: on success `a` holds `L` with
/// `L·Lᵗ` equal to the input and the strict upper triangle zeroed.
///
/// Only the lower triangle of the input is read. Column by column, the
/// rows below the pivot are updated in parallel.
pub fn potrf(a: &mut Block) -> Result<(), KernelError> {
    let n = a.dim();
    let data = a.as_mut_slice();

    for j in 0..n {
        let (head, tail) = data.split_at_mut((j + 1) * n);
        let row_j = &mut head[j * n..];

        let pivot = row_j[j] - row_j[..j].iter().map(|v| v * v).sum::<f64>();
        if pivot.is_nan() || pivot <= 0.0 {
            return Err(KernelError::NotPositiveDefinite { column: j, pivot });
        }
        let diag = pivot.sqrt();
        row_j[j] = diag;
        for v in &mut row_j[j + 1..] {
            *v = 0.0;
        }

        let row_j = &*row_j;
        tail.par_chunks_mut(n).for_each(|row_i| {
            let dot: f64 = row_i[..j].iter().zip(&row_j[..j]).map(|(x, y)| x * y).sum();
            row_i[j] = (row_i[j] - dot) / diag;
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd(n: usize) -> Block {
        // Tridiagonal with dominant diagonal.
        Block::from_fn(n, |r, c| match r.abs_diff(c) {
            0 => 4.0,
            1 => -1.0,
            _ => 0.0,
        })
    }

    fn reconstruct(l: &Block) -> Block {
        let n = l.dim();
        Block::from_fn(n, |r, c| (0..n).map(|k| l.get(r, k) * l.get(c, k)).sum())
    }

    #[test]
    fn factor_reproduces_input() {
        let a = spd(5);
        let mut l = a.clone();
        potrf(&mut l).unwrap();
        assert!(reconstruct(&l).max_abs_diff(&a) < 1e-12);
        assert_eq!(l.get(0, 3), 0.0);
        assert_eq!(l, l.lower());
    }

    #[test]
    fn known_two_by_two() {
        let mut a = Block::from_vec(2, vec![4.0, 2.0, 2.0, 5.0]).unwrap();
        potrf(&mut a).unwrap();
        assert_eq!(a.as_slice(), &[2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn rejects_indefinite_matrix() {
        let mut a = Block::from_vec(2, vec![1.0, 2.0, 2.0, 1.0]).unwrap();
        let err = potrf(&mut a).unwrap_err();
        assert!(matches!(err, KernelError::NotPositiveDefinite { column: 1, .. }));
    }

    #[test]
    fn rejects_negative_diagonal() {
        let mut a = Block::from_fn(3, |r, c| if r == c { -1.0 } else { 0.0 });
        assert!(matches!(
            potrf(&mut a),
            Err(KernelError::NotPositiveDefinite { column: 0, .. })
        ));
    }

    #[test]
    fn empty_block_is_trivially_factored() {
        let mut a = Block::zeros(0);
        assert!(potrf(&mut a).is_ok());
    }
}
