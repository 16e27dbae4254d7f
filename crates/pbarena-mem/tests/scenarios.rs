//! End-to-end lifetime scenarios against an instrumented backing allocator.

use std::sync::Arc;

use pbarena_mem::{Arena, ArenaConfig, BlockAlloc, GroupMember};
use pbarena_test_utils::{CleanupLog, CountingAlloc};

fn arena_over(alloc: &Arc<CountingAlloc>, config: ArenaConfig) -> Arena {
    let alloc: Arc<dyn BlockAlloc> = alloc.clone();
    Arena::with_allocator(config, alloc).unwrap()
}

#[test]
fn fused_pair_tears_down_on_last_release() {
    let alloc = CountingAlloc::new();
    let log = CleanupLog::new();

    let x = arena_over(&alloc, ArenaConfig::new());
    let x_data = x.allocate(16, 8).unwrap();
    x.register_cleanup_fn(log.recorder("C1")).unwrap();

    let y = arena_over(&alloc, ArenaConfig::new());
    let y_data = y.allocate(32, 8).unwrap();
    y.register_cleanup_fn(log.recorder("C2")).unwrap();

    x.fuse(&y);
    assert!(x.is_fused_with(&y));
    assert_eq!(x.ref_count(), 2);
    assert_eq!(y.ref_count(), 2);

    x.release();
    assert_eq!(y.ref_count(), 1);
    assert!(log.is_empty());
    assert_eq!(alloc.live_blocks(), 2);
    // X's memory belongs to the group and outlives X's handle.
    unsafe {
        x_data.as_ptr().write_bytes(0xAB, 16);
        y_data.as_ptr().write_bytes(0xCD, 32);
        assert_eq!(*x_data.as_ptr().add(15), 0xAB);
    }

    y.release();
    let ran = log.entries();
    assert_eq!(ran.len(), 2);
    assert!(ran.contains(&"C1") && ran.contains(&"C2"));
    assert_eq!(alloc.live_blocks(), 0);
    assert_eq!(alloc.frees(), 2);
}

#[test]
fn per_arena_cleanup_order_survives_fusion() {
    let log = CleanupLog::new();
    let a = Arena::new();
    let b = Arena::new();
    for i in 0..3 {
        a.register_cleanup_fn(log.recorder(("a", i))).unwrap();
        b.register_cleanup_fn(log.recorder(("b", i))).unwrap();
    }
    b.fuse(&a);
    drop(a);
    drop(b);

    let ran = log.entries();
    assert_eq!(ran.len(), 6);
    for side in ["a", "b"] {
        let order: Vec<_> = ran.iter().filter(|e| e.0 == side).map(|e| e.1).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}

#[test]
fn exhausted_block_is_replaced_transparently() {
    let alloc = CountingAlloc::new();
    let config = ArenaConfig {
        first_block_size: 128,
        max_block_size: 1024,
    };
    let arena = arena_over(&alloc, config);

    let mut last_used = 0;
    let mut seen = Vec::new();
    while arena.block_count() < 2 {
        let p = arena.allocate(16, 8).unwrap();
        unsafe { p.as_ptr().write_bytes(seen.len() as u8, 16) };
        seen.push(p);
        assert!(arena.bytes_used() >= last_used);
        last_used = arena.bytes_used();
    }
    assert!(seen.len() > 1);
    assert_eq!(alloc.acquired_sizes(), vec![128, 256]);

    // Earlier allocations are untouched by the switch to a new block.
    for (i, p) in seen.iter().enumerate() {
        assert_eq!(unsafe { *p.as_ptr().add(15) }, i as u8);
    }

    drop(arena);
    assert_eq!(alloc.live_blocks(), 0);
}

#[test]
fn allocation_failure_leaves_arena_usable() {
    let alloc = pbarena_test_utils::FailingAlloc::new(1);
    let backing: Arc<dyn BlockAlloc> = alloc.clone();
    let arena = Arena::with_allocator(ArenaConfig::new(), backing).unwrap();

    arena.allocate(64, 8).unwrap();
    let err = arena.allocate(4096, 8).unwrap_err();
    assert!(matches!(
        err,
        pbarena_mem::ArenaError::AllocationFailed { requested: 4096, .. }
    ));
    // Still serving from the block it already has.
    arena.allocate(32, 8).unwrap();
    assert_eq!(arena.block_count(), 1);

    drop(arena);
    assert_eq!(alloc.counts().live_blocks(), 0);
}

#[test]
fn retained_ref_keeps_unfused_arena_alive() {
    let alloc = CountingAlloc::new();
    let log = CleanupLog::new();
    let arena = arena_over(&alloc, ArenaConfig::new());
    arena.register_cleanup_fn(log.recorder(1)).unwrap();
    let data = arena.alloc_value(7u64).unwrap();

    let keep = arena.retain();
    drop(arena);
    assert!(log.is_empty());
    assert_eq!(unsafe { *data.as_ptr() }, 7);
    assert_eq!(keep.ref_count(), 1);

    drop(keep);
    assert_eq!(log.entries(), vec![1]);
    assert_eq!(alloc.live_blocks(), 0);
}
