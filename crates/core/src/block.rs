use std::fmt;

/// Identifies one kernel invocation in the dependency graph.
/// Ids are allocated in submission order, so a smaller id was submitted earlier.
pub type NodeId = u64;

/// Identifies one block's storage slot.
pub type BlockId = u64;

/// Dense square block of `f64` values stored row-major.
#[derive(Clone, PartialEq)]
pub struct Block {
    dim: usize,
    data: Vec<f64>,
}

impl Block {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; dim * dim],
        }
    }

    pub fn identity(dim: usize) -> Self {
        Self::from_fn(dim, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    /// Build a block by evaluating `f(row, col)` for every element.
    pub fn from_fn(dim: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(dim * dim);
        for r in 0..dim {
            for c in 0..dim {
                data.push(f(r, c));
            }
        }
        Self { dim, data }
    }

    /// Wrap a row-major buffer. Returns `None` unless `data.len() == dim * dim`.
    pub fn from_vec(dim: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == dim * dim).then_some(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.dim == 0
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.dim + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.dim + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn transpose(&self) -> Self {
        Self::from_fn(self.dim, |r, c| self.get(c, r))
    }

    /// Copy of the lower triangle (diagonal included), upper triangle zeroed.
    pub fn lower(&self) -> Self {
        Self::from_fn(self.dim, |r, c| if c <= r { self.get(r, c) } else { 0.0 })
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        (0..self.dim).all(|r| (0..r).all(|c| (self.get(r, c) - self.get(c, r)).abs() <= tol))
    }

    /// Largest elementwise absolute difference. Blocks of different size
    /// compare as infinitely far apart.
    pub fn max_abs_diff(&self, other: &Block) -> f64 {
        if self.dim != other.dim {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Large blocks would flood test failure output.
        if self.dim > 8 {
            return write!(f, "Block({}x{})", self.dim, self.dim);
        }
        f.debug_list()
            .entries((0..self.dim).map(|r| self.row(r)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_and_transpose() {
        let id = Block::identity(3);
        assert_eq!(id.get(1, 1), 1.0);
        assert_eq!(id.get(0, 2), 0.0);
        assert_eq!(id.transpose(), id);

        let b = Block::from_fn(2, |r, c| (r * 2 + c) as f64);
        let t = b.transpose();
        assert_eq!(t.get(0, 1), 2.0);
        assert_eq!(t.get(1, 0), 1.0);
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(Block::from_vec(2, vec![1.0, 2.0, 3.0, 4.0]).is_some());
        assert!(Block::from_vec(2, vec![1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn lower_zeroes_upper_triangle() {
        let b = Block::from_fn(3, |_, _| 5.0);
        let l = b.lower();
        assert_eq!(l.get(2, 0), 5.0);
        assert_eq!(l.get(1, 1), 5.0);
        assert_eq!(l.get(0, 2), 0.0);
    }

    #[test]
    fn max_abs_diff_and_symmetry() {
        let a = Block::from_fn(2, |r, c| (r + c) as f64);
        let mut b = a.clone();
        b.set(1, 0, 1.5);
        assert_eq!(a.max_abs_diff(&b), 0.5);
        assert!(a.is_symmetric(0.0));
        assert!(!b.is_symmetric(0.1));
        assert_eq!(a.max_abs_diff(&Block::zeros(3)), f64::INFINITY);
    }
}
