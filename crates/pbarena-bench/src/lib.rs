//! Benchmark workloads for pbarena.
//!
//! - [`decode_profile`]: seeded message-shaped allocation stream
//! - [`fill`]: replay a workload into one arena
//! - [`fused_chain`]: a group of `n` arenas fused end to end

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use pbarena_mem::{Arena, ArenaError, ArenaRef, GroupMember};
use pbarena_test_utils::workload::{message_sizes, Request};

/// Allocation stream resembling one decoded message tree.
pub fn decode_profile(seed: u64) -> Vec<Request> {
    message_sizes(seed, 1024)
}

/// Allocate every request in `requests` from `arena`; returns bytes requested.
pub fn fill(arena: &Arena, requests: &[Request]) -> Result<usize, ArenaError> {
    let mut total = 0;
    for r in requests {
        arena.allocate(r.size, r.align)?;
        total += r.size;
    }
    Ok(total)
}

/// Create `n` arenas and fuse each into its predecessor.
///
/// Returns a reference per arena; the handles themselves are released.
pub fn fused_chain(n: usize) -> Vec<ArenaRef> {
    let mut refs: Vec<ArenaRef> = Vec::with_capacity(n);
    for _ in 0..n {
        let arena = Arena::new();
        if let Some(prev) = refs.last() {
            arena.fuse(prev);
        }
        refs.push(arena.retain());
    }
    refs
}
