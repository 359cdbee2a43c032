use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tilegraph_core::Block;

/// Random symmetric block `X + Xᵗ` with `X` uniform in `[0, 1)`.
///
/// Diagonal blocks get `2·dim` added on the diagonal, which keeps the
/// assembled matrix positive definite for the sizes this workload uses.
pub fn generate_block(dim: usize, diagonal: bool, seed: u64) -> Block {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<f64> = (0..dim * dim).map(|_| rng.gen::<f64>()).collect();
    let bias = 2.0 * dim as f64;
    Block::from_fn(dim, |r, c| {
        let v = x[r * dim + c] + x[c * dim + r];
        if diagonal && r == c { v + bias } else { v }
    })
}

/// Per-block seed derived from the run seed and the block's grid position.
///
/// SplitMix64 finalizer over the packed coordinates, so neighbouring blocks
/// get unrelated streams.
pub fn block_seed(base: u64, row: usize, col: usize) -> u64 {
    let mut z = base
        .wrapping_add((row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add((col as u64).wrapping_mul(0xD1B5_4A32_D192_ED03));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
