//! Finalizers run when an arena's blocks are about to be released.
//!
//! Entries are stored intrusively in the arena's own blocks, so registering
//! one costs a bump allocation and never a separate heap allocation.

use std::alloc::Layout;
use std::ptr::NonNull;

use pbarena_core::ArenaError;

use crate::block::BlockStore;

/// A finalizer registered against an arena.
///
/// Called exactly once, with the context pointer it was registered with,
/// before the arena's blocks are returned to the backing allocator.
pub type Finalizer = unsafe fn(NonNull<()>);

struct CleanupEntry {
    finalizer: Finalizer,
    context: NonNull<()>,
    next: Option<NonNull<CleanupEntry>>,
}

/// Ordered list of `(finalizer, context)` pairs.
pub(crate) struct CleanupList {
    head: Option<NonNull<CleanupEntry>>,
    tail: Option<NonNull<CleanupEntry>>,
    len: usize,
    ran: bool,
}

impl CleanupList {
    pub(crate) fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            ran: false,
        }
    }

    /// Append an entry, allocating it from `store`.
    ///
    /// # Safety
    ///
    /// `store` must be the block store of the arena that owns this list, so
    /// that entries outlive every call to [`CleanupList::run`].
    pub(crate) unsafe fn push(
        &mut self,
        store: &mut BlockStore,
        finalizer: Finalizer,
        context: NonNull<()>,
    ) -> Result<(), ArenaError> {
        let entry = store.alloc(Layout::new::<CleanupEntry>())?.cast::<CleanupEntry>();
        // SAFETY: `entry` is a fresh, aligned region sized for one entry.
        unsafe {
            entry.as_ptr().write(CleanupEntry {
                finalizer,
                context,
                next: None,
            });
        }
        match self.tail {
            // SAFETY: the tail entry lives in the same store.
            Some(mut tail) => unsafe { tail.as_mut().next = Some(entry) },
            None => self.head = Some(entry),
        }
        self.tail = Some(entry);
        self.len += 1;
        Ok(())
    }

    /// Number of registered entries not yet run.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Invoke every finalizer in registration order and clear the list.
    ///
    /// Returns the number of finalizers run.
    ///
    /// # Panics
    ///
    /// Panics if the list has already been run: a second teardown of the
    /// same arena means the lifetime bookkeeping is corrupt.
    ///
    /// # Safety
    ///
    /// The blocks holding the entries must still be live, and every
    /// registered finalizer must be sound to call with its context now.
    pub(crate) unsafe fn run(&mut self) -> usize {
        assert!(!self.ran, "arena cleanup list torn down twice");
        self.ran = true;
        let mut next = self.head.take();
        self.tail = None;
        let mut count = 0;
        while let Some(entry) = next {
            // SAFETY: entries are live until the owning store is dropped,
            // which happens strictly after this call.
            let CleanupEntry {
                finalizer,
                context,
                next: following,
            } = unsafe { entry.as_ptr().read() };
            next = following;
            // SAFETY: forwarded caller contract.
            unsafe { finalizer(context) };
            count += 1;
        }
        self.len = 0;
        count
    }
}
