//! Multi-threaded fuse, retain and release against shared groups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use pbarena_mem::{Arena, ArenaConfig, ArenaRef, BlockAlloc, GroupMember};
use pbarena_test_utils::CountingAlloc;

const ARENAS: usize = 64;
const WORKERS: usize = 4;

fn populated_arenas(alloc: &Arc<CountingAlloc>, ran: &Arc<AtomicUsize>) -> Vec<ArenaRef> {
    (0..ARENAS)
        .map(|i| {
            let backing: Arc<dyn BlockAlloc> = alloc.clone();
            let arena = Arena::with_allocator(ArenaConfig::new(), backing).unwrap();
            arena.allocate(24 + i, 8).unwrap();
            let ran = Arc::clone(ran);
            arena
                .register_cleanup_fn(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            arena.retain()
        })
        .collect()
}

#[test]
fn concurrent_fuses_converge_to_one_group() {
    let alloc = CountingAlloc::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let refs = populated_arenas(&alloc, &ran);
    assert_eq!(alloc.live_blocks(), ARENAS);

    let (tx, rx) = unbounded::<(ArenaRef, ArenaRef)>();
    // A chain guarantees connectivity; the scattered pairs make fuses
    // race on shared roots from both ends.
    for i in 0..ARENAS {
        tx.send((refs[i].retain(), refs[(i + 1) % ARENAS].retain()))
            .unwrap();
        tx.send((refs[(i * 7 + 3) % ARENAS].retain(), refs[i].retain()))
            .unwrap();
    }
    drop(tx);

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let rx = rx.clone();
            thread::spawn(move || {
                for (a, b) in rx.iter() {
                    a.fuse(&b);
                    assert!(a.is_fused_with(&b));
                    let extra = b.retain();
                    drop(a);
                    extra.fuse(&b);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    for r in &refs {
        assert!(refs[0].is_fused_with(r));
    }
    assert_eq!(refs[0].ref_count(), ARENAS);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(alloc.live_blocks(), ARENAS);

    drop(refs);
    assert_eq!(ran.load(Ordering::SeqCst), ARENAS);
    assert_eq!(alloc.live_blocks(), 0);
}

#[test]
fn racing_releases_tear_down_exactly_once() {
    for _ in 0..20 {
        let alloc = CountingAlloc::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let refs = populated_arenas(&alloc, &ran);
        for pair in refs.windows(2) {
            pair[0].fuse(&pair[1]);
        }
        assert_eq!(refs[0].ref_count(), ARENAS);

        let (tx, rx) = unbounded::<ArenaRef>();
        for r in refs {
            tx.send(r).unwrap();
        }
        drop(tx);
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let rx = rx.clone();
                thread::spawn(move || {
                    for r in rx.iter() {
                        let again = r.retain();
                        drop(r);
                        drop(again);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(ran.load(Ordering::SeqCst), ARENAS);
        assert_eq!(alloc.live_blocks(), 0);
    }
}

#[test]
fn fused_arenas_allocate_from_their_own_threads() {
    let alloc = CountingAlloc::new();
    let backing: Arc<dyn BlockAlloc> = alloc.clone();
    let hub = Arena::with_allocator(ArenaConfig::new(), backing).unwrap();
    let (tx, rx) = unbounded::<ArenaRef>();

    let workers: Vec<_> = (0..WORKERS)
        .map(|t| {
            let hub = hub.retain();
            let backing: Arc<dyn BlockAlloc> = alloc.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let arena = Arena::with_allocator(ArenaConfig::new(), backing).unwrap();
                arena.fuse(&hub);
                for i in 0..500usize {
                    let p = arena.allocate(8 + i % 48, 8).unwrap();
                    unsafe { p.as_ptr().write_bytes(t as u8, 8) };
                }
                tx.send(arena.retain()).unwrap();
            })
        })
        .collect();
    drop(tx);
    for w in workers {
        w.join().unwrap();
    }

    let members: Vec<ArenaRef> = rx.iter().collect();
    assert_eq!(members.len(), WORKERS);
    for m in &members {
        assert!(hub.is_fused_with(m));
    }
    assert_eq!(hub.ref_count(), WORKERS + 1);
    assert!(alloc.live_blocks() > WORKERS);

    drop(members);
    assert!(alloc.live_blocks() > 0);
    drop(hub);
    assert_eq!(alloc.live_blocks(), 0);
}
