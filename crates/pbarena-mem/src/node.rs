//! Heap-resident per-arena state shared by every handle to the arena.

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

use pbarena_core::ArenaId;

use crate::block::BlockStore;
use crate::cleanup::CleanupList;
use crate::sync::{AtomicPtr, Ordering};
use crate::tagged::LifetimeNode;

/// One arena: its lifetime word, its place in the group's member list,
/// and its allocation state.
///
/// Only `lifetime`, `next` and `tail` are touched concurrently. `store` and
/// `cleanups` belong to the single allocating handle until group teardown,
/// which happens after every other reference is gone.
pub struct ArenaInner {
    pub(crate) id: ArenaId,
    pub(crate) lifetime: LifetimeNode<ArenaInner>,
    /// Next member in the group's list.
    pub(crate) next: AtomicPtr<ArenaInner>,
    /// Hint for the last member of the list starting here. May lag behind.
    pub(crate) tail: AtomicPtr<ArenaInner>,
    pub(crate) store: UnsafeCell<BlockStore>,
    pub(crate) cleanups: UnsafeCell<CleanupList>,
}

// SAFETY: the shared fields are atomics; `store` and `cleanups` are only
// accessed by the unique `Arena` handle, or by the thread performing
// teardown once no other reference exists.
unsafe impl Send for ArenaInner {}
unsafe impl Sync for ArenaInner {}

impl ArenaInner {
    /// Box a fresh, unfused root with one reference and leak it.
    ///
    /// The returned node is reclaimed by [`ArenaInner::destroy`].
    pub(crate) fn create(id: ArenaId, store: BlockStore) -> NonNull<ArenaInner> {
        let boxed = Box::new(ArenaInner {
            id,
            lifetime: LifetimeNode::root(1),
            next: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            store: UnsafeCell::new(store),
            cleanups: UnsafeCell::new(CleanupList::new()),
        });
        let node = NonNull::from(Box::leak(boxed));
        // SAFETY: just leaked; nothing else can see it yet.
        unsafe { node.as_ref() }
            .tail
            .store(node.as_ptr(), Ordering::Relaxed);
        node
    }

    /// Free the node and, through its block store, every block it owns.
    ///
    /// # Safety
    ///
    /// `node` must come from [`ArenaInner::create`], its cleanups must have
    /// run, and no other pointer to it may be used afterwards.
    pub(crate) unsafe fn destroy(node: NonNull<ArenaInner>) {
        // SAFETY: forwarded caller contract.
        drop(unsafe { Box::from_raw(node.as_ptr()) });
    }
}
