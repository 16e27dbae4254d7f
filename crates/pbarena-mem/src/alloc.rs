//! Backing allocators that supply raw blocks to arenas.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// A source of raw memory blocks for arenas.
///
/// Arenas only ever request whole blocks through this trait and hand every
/// block back, with the exact layout it was requested with, when their
/// fused group is torn down. Caller-supplied initial blocks never pass
/// through it.
///
/// # Safety
///
/// `alloc_block` must return either `None` or a pointer to a fresh region
/// of at least `layout.size()` bytes aligned to `layout.align()`, valid
/// until it is passed to `free_block`. Implementations are shared across
/// threads because teardown may run on whichever thread drops the last
/// reference.
pub unsafe trait BlockAlloc: Send + Sync {
    /// Acquire a block. `layout.size()` is never zero.
    fn alloc_block(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return a block previously acquired from this allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_block` on this allocator with the same
    /// `layout`, and must not be freed twice.
    unsafe fn free_block(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Forwards block requests to the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAlloc;

impl SystemAlloc {
    /// A shared handle suitable for [`Arena::with_allocator`](crate::Arena::with_allocator).
    pub fn shared() -> Arc<dyn BlockAlloc> {
        Arc::new(SystemAlloc)
    }
}

// SAFETY: delegates to `std::alloc`, which upholds the trait contract for
// non-zero-sized layouts.
unsafe impl BlockAlloc for SystemAlloc {
    fn alloc_block(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // SAFETY: block layouts are never zero-sized.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn free_block(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

#[cfg(test)]
pub(crate) mod tally {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts blocks passing through the system allocator.
    #[derive(Default)]
    pub(crate) struct Tally {
        pub(crate) allocs: AtomicUsize,
        pub(crate) frees: AtomicUsize,
    }

    impl Tally {
        pub(crate) fn live(&self) -> usize {
            self.allocs.load(Ordering::SeqCst) - self.frees.load(Ordering::SeqCst)
        }
    }

    unsafe impl BlockAlloc for Tally {
        fn alloc_block(&self, layout: Layout) -> Option<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            SystemAlloc.alloc_block(layout)
        }

        unsafe fn free_block(&self, ptr: NonNull<u8>, layout: Layout) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            unsafe { SystemAlloc.free_block(ptr, layout) }
        }
    }
}
