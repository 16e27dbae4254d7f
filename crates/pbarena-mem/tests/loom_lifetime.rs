//! Exhaustive interleaving checks for the lifetime protocol.
//!
//! Run with `RUSTFLAGS="--cfg loom" cargo test --release --test loom_lifetime`.

#![cfg(loom)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use loom::thread;
use pbarena_mem::{Arena, ArenaConfig, BlockAlloc, GroupMember};
use pbarena_test_utils::CountingAlloc;

fn arena(alloc: &Arc<CountingAlloc>) -> Arena {
    let backing: Arc<dyn BlockAlloc> = alloc.clone();
    let arena = Arena::with_allocator(ArenaConfig::new(), backing).unwrap();
    arena.allocate(16, 8).unwrap();
    arena
}

#[test]
fn overlapping_fuses_share_one_root() {
    loom::model(|| {
        let alloc = CountingAlloc::new();
        let a = arena(&alloc);
        let b = arena(&alloc);
        let c = arena(&alloc);

        let (ra, rb1) = (a.retain(), b.retain());
        let (rb2, rc) = (b.retain(), c.retain());
        let t1 = thread::spawn(move || ra.fuse(&rb1));
        let t2 = thread::spawn(move || rb2.fuse(&rc));
        t1.join().unwrap();
        t2.join().unwrap();

        assert!(a.is_fused_with(&c));
        assert_eq!(a.ref_count(), 3);
        drop((a, b, c));
        assert_eq!(alloc.live_blocks(), 0);
    });
}

#[test]
fn release_racing_fuse_never_double_frees() {
    loom::model(|| {
        let alloc = CountingAlloc::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let a = arena(&alloc);
        let b = arena(&alloc);
        for arena in [&a, &b] {
            let ran = Arc::clone(&ran);
            arena
                .register_cleanup_fn(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        let ra = a.retain();
        let rb = b.retain();
        let t = thread::spawn(move || {
            ra.fuse(&rb);
            drop(rb);
        });
        drop(a);
        drop(b);
        t.join().unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(alloc.live_blocks(), 0);
    });
}
