//! Test utilities for pbarena development.
//!
//! Provides instrumented [`BlockAlloc`] implementations
//! ([`CountingAlloc`], [`FailingAlloc`]), a thread-safe [`CleanupLog`]
//! for asserting finalizer order, and seeded workload generators in
//! [`workload`].

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod workload;

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use pbarena_mem::{BlockAlloc, SystemAlloc};

/// Backing allocator that records every block it hands out.
///
/// Live blocks are kept in an `IndexMap` keyed by address, in acquisition
/// order, so tests can check that teardown returns exactly what was taken.
#[derive(Default)]
pub struct CountingAlloc {
    live: Mutex<IndexMap<usize, usize>>,
    history: Mutex<Vec<usize>>,
    frees: AtomicUsize,
}

impl CountingAlloc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of blocks acquired and not yet returned.
    pub fn live_blocks(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Bytes acquired and not yet returned.
    pub fn live_bytes(&self) -> usize {
        self.live.lock().unwrap().values().sum()
    }

    /// Sizes of every block ever acquired, in order.
    pub fn acquired_sizes(&self) -> Vec<usize> {
        self.history.lock().unwrap().clone()
    }

    /// Number of blocks ever returned.
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

unsafe impl BlockAlloc for CountingAlloc {
    fn alloc_block(&self, layout: Layout) -> Option<NonNull<u8>> {
        let block = SystemAlloc.alloc_block(layout)?;
        self.live
            .lock()
            .unwrap()
            .insert(block.as_ptr() as usize, layout.size());
        self.history.lock().unwrap().push(layout.size());
        Some(block)
    }

    unsafe fn free_block(&self, ptr: NonNull<u8>, layout: Layout) {
        let recorded = self
            .live
            .lock()
            .unwrap()
            .shift_remove(&(ptr.as_ptr() as usize));
        assert_eq!(
            recorded,
            Some(layout.size()),
            "freed a block that was not live, or with the wrong size"
        );
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { SystemAlloc.free_block(ptr, layout) }
    }
}

/// Backing allocator that succeeds for the first `budget` blocks and
/// refuses every request after that.
pub struct FailingAlloc {
    remaining: AtomicUsize,
    inner: Arc<CountingAlloc>,
}

impl FailingAlloc {
    pub fn new(budget: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(budget),
            inner: CountingAlloc::new(),
        })
    }

    /// The counting allocator that serves the successful requests.
    pub fn counts(&self) -> &CountingAlloc {
        &self.inner
    }
}

unsafe impl BlockAlloc for FailingAlloc {
    fn alloc_block(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()?;
        self.inner.alloc_block(layout)
    }

    unsafe fn free_block(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.free_block(ptr, layout) }
    }
}

/// Ordered, thread-safe record of finalizer invocations.
#[derive(Clone, Default)]
pub struct CleanupLog<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> CleanupLog<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A closure that appends `tag` when called.
    pub fn recorder(&self, tag: T) -> impl FnOnce() + Send + 'static {
        let entries = Arc::clone(&self.entries);
        move || entries.lock().unwrap().push(tag)
    }

    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
