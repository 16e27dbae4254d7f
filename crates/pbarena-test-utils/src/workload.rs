//! Seeded allocation workloads.
//!
//! Deterministic so that a failing test or a benchmark regression can be
//! replayed from its seed.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// One allocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub size: usize,
    pub align: usize,
}

/// Message-shaped allocation sizes: mostly small fixed-size structs and
/// short strings, with an occasional large repeated-field buffer.
pub fn message_sizes(seed: u64, count: usize) -> Vec<Request> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let size = match rng.random_range(0u32..100) {
                0..=69 => rng.random_range(8..64),
                70..=97 => rng.random_range(64..512),
                _ => rng.random_range(4096..16384),
            };
            let align = 1 << rng.random_range(0u32..4);
            Request { size, align }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_workload() {
        assert_eq!(message_sizes(7, 100), message_sizes(7, 100));
    }

    #[test]
    fn alignments_are_powers_of_two() {
        assert!(message_sizes(3, 500)
            .iter()
            .all(|r| r.align.is_power_of_two() && r.size > 0));
    }
}
