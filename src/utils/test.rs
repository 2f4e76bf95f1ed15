use rand::rngs::ThreadRng;
use rand::Rng;

/// Allocation size skewed towards small requests, with an occasional multi-page one
pub fn random_request_size(rng: &mut ThreadRng) -> usize {
    match rng.gen_range(0..100u32) {
        0..=69 => rng.gen_range(0..128usize),
        70..=94 => rng.gen_range(128..4096usize),
        95..=98 => rng.gen_range(4096..40_000usize),
        _ => rng.gen_range(40_000..200_000usize),
    }
}

/// Deterministic filler, so each allocation can be told apart from its neighbors
pub fn pattern(seed: u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (seed.wrapping_mul(31).wrapping_add(i as u64 * 7) % 251) as u8)
        .collect()
}
