//! Public arena handles.
//!
//! An [`Arena`] is the unique allocating handle for one arena. An
//! [`ArenaRef`] is a retained reference to an arena's fused group that can
//! keep it alive, fuse it, and be shared across threads, but cannot
//! allocate. Each handle owns exactly one reference to the group; dropping
//! the last one tears the whole group down.

use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use pbarena_core::{ArenaConfig, ArenaError, ArenaId};

use crate::alloc::{BlockAlloc, SystemAlloc};
use crate::block::BlockStore;
use crate::cleanup::Finalizer;
use crate::fuse;
use crate::node::ArenaInner;

mod sealed {
    use std::ptr::NonNull;

    use crate::node::ArenaInner;

    pub trait Sealed {
        fn node(&self) -> NonNull<ArenaInner>;
    }
}

/// Operations shared by every handle that holds a reference to an arena
/// group: [`Arena`] and [`ArenaRef`].
pub trait GroupMember: sealed::Sealed {
    /// Fuse this arena's group with `other`'s so that they are torn down
    /// together. Idempotent; there is no way to undo it.
    ///
    /// The combined group lives until every reference held against either
    /// side has been released.
    fn fuse<M: GroupMember + ?Sized>(&self, other: &M) {
        fuse::fuse(self.node(), other.node());
    }

    /// Whether this arena and `other` are currently in the same group.
    fn is_fused_with<M: GroupMember + ?Sized>(&self, other: &M) -> bool {
        fuse::same_group(self.node(), other.node())
    }

    /// Take a new reference to the group.
    fn retain(&self) -> ArenaRef {
        fuse::retain(self.node());
        ArenaRef { inner: self.node() }
    }

    /// Live references to the group at the moment of the call.
    ///
    /// Approximate under concurrency; intended for diagnostics and tests.
    fn ref_count(&self) -> usize {
        fuse::find_root(self.node()).refs
    }

    /// Identifier of the arena this handle was created for.
    fn id(&self) -> ArenaId {
        // SAFETY: the handle keeps the node alive.
        unsafe { self.node().as_ref() }.id
    }
}

/// A bump arena whose lifetime can be fused with other arenas.
///
/// Allocation is through `&self` but the handle is not `Sync` and not
/// `Clone`, so one thread at a time allocates into a given arena. Fused
/// arenas keep separate block chains and may allocate from different
/// threads concurrently.
///
/// Pointers returned by allocation stay valid until the arena's whole
/// fused group is torn down, which may be later than this handle's drop
/// if other references are still held.
pub struct Arena {
    inner: NonNull<ArenaInner>,
    _not_sync: PhantomData<Cell<()>>,
}

// SAFETY: the allocation state travels with the unique handle; everything
// shared with other handles is atomic.
unsafe impl Send for Arena {}

impl Arena {
    /// Create an arena with default block sizes over the global allocator.
    ///
    /// No memory is acquired until the first allocation.
    pub fn new() -> Self {
        Self::build(BlockStore::new(
            ArenaId::next(),
            ArenaConfig::new(),
            SystemAlloc::shared(),
        ))
    }

    /// Create an arena with custom block sizes.
    pub fn with_config(config: ArenaConfig) -> Result<Self, ArenaError> {
        Self::with_allocator(config, SystemAlloc::shared())
    }

    /// Create an arena that acquires its blocks from `alloc`.
    pub fn with_allocator(
        config: ArenaConfig,
        alloc: Arc<dyn BlockAlloc>,
    ) -> Result<Self, ArenaError> {
        config.validate()?;
        Ok(Self::build(BlockStore::new(ArenaId::next(), config, alloc)))
    }

    /// Create an arena that serves allocations from `buf` before acquiring
    /// blocks of its own. `buf` is never handed to the backing allocator.
    pub fn with_initial_block(
        buf: &'static mut [MaybeUninit<u8>],
        config: ArenaConfig,
    ) -> Result<Self, ArenaError> {
        let len = buf.len();
        let ptr = NonNull::from(buf).cast::<u8>();
        // SAFETY: a `'static` exclusive borrow outlives any group.
        unsafe { Self::from_raw_initial_block(ptr, len, config, SystemAlloc::shared()) }
    }

    /// Create an arena over caller memory at `ptr..ptr + len`.
    ///
    /// A region too small to hold the block bookkeeping is ignored.
    ///
    /// # Safety
    ///
    /// The region must be writable, must not be accessed by anything else,
    /// and must stay valid until the fused group this arena ends up in has
    /// been torn down, not merely until this handle is dropped.
    pub unsafe fn from_raw_initial_block(
        ptr: NonNull<u8>,
        len: usize,
        config: ArenaConfig,
        alloc: Arc<dyn BlockAlloc>,
    ) -> Result<Self, ArenaError> {
        config.validate()?;
        // SAFETY: forwarded caller contract.
        let store =
            unsafe { BlockStore::with_initial_block(ArenaId::next(), config, alloc, ptr, len) };
        Ok(Self::build(store))
    }

    fn build(store: BlockStore) -> Self {
        let id = store.owner();
        Self {
            inner: ArenaInner::create(id, store),
            _not_sync: PhantomData,
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn store(&self) -> &mut BlockStore {
        // SAFETY: `Arena` is the only handle that touches the store, it is
        // `!Sync`, and no borrow of the store escapes a method call.
        unsafe { &mut *(*self.inner.as_ptr()).store.get() }
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// The region is uninitialised. Fails with
    /// [`ArenaError::InvalidLayout`] if `align` is not a power of two, and
    /// with [`ArenaError::AllocationFailed`] if the backing allocator
    /// refuses a new block.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| ArenaError::InvalidLayout { size, align })?;
        self.allocate_layout(layout)
    }

    /// Allocate a region described by `layout`.
    pub fn allocate_layout(&self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        self.store().alloc(layout)
    }

    /// Register `finalizer(context)` to run when the group is torn down,
    /// after finalizers registered earlier on this arena.
    ///
    /// # Safety
    ///
    /// `finalizer` must be sound to call with `context` on any thread at
    /// teardown time. It must not touch this arena's group through any
    /// handle; arena-resident memory is still readable while it runs.
    pub unsafe fn register_cleanup(
        &self,
        finalizer: Finalizer,
        context: NonNull<()>,
    ) -> Result<(), ArenaError> {
        // SAFETY: the cleanup list and the store belong to the same arena.
        unsafe {
            let inner = &*self.inner.as_ptr();
            (*inner.cleanups.get()).push(&mut *inner.store.get(), finalizer, context)
        }
    }

    /// Register a closure to run when the group is torn down.
    ///
    /// The closure itself is stored in arena memory.
    pub fn register_cleanup_fn<F>(&self, f: F) -> Result<(), ArenaError>
    where
        F: FnOnce() + Send + 'static,
    {
        unsafe fn call_once<F: FnOnce()>(ctx: NonNull<()>) {
            // SAFETY: `ctx` was written with an `F` and is read exactly once.
            let f = unsafe { ctx.cast::<F>().as_ptr().read() };
            f();
        }
        let slot = self.allocate_layout(Layout::new::<F>())?.cast::<F>();
        // SAFETY: fresh region sized and aligned for `F`.
        unsafe { slot.as_ptr().write(f) };
        // SAFETY: `F: Send + 'static`, so calling it on any thread at
        // teardown is sound.
        let registered = unsafe { self.register_cleanup(call_once::<F>, slot.cast()) };
        if registered.is_err() {
            // SAFETY: never registered, so never read by teardown.
            unsafe { ptr::drop_in_place(slot.as_ptr()) };
        }
        registered
    }

    /// Move `value` into the arena. If `T` needs dropping, its destructor
    /// runs at group teardown.
    pub fn alloc_value<T: Send + 'static>(&self, value: T) -> Result<NonNull<T>, ArenaError> {
        unsafe fn drop_value<T>(ctx: NonNull<()>) {
            // SAFETY: registered with a live, initialised `T`.
            unsafe { ptr::drop_in_place(ctx.cast::<T>().as_ptr()) }
        }
        let slot = self.allocate_layout(Layout::new::<T>())?.cast::<T>();
        if mem::needs_drop::<T>() {
            // Register before writing so a failure cannot leak `value`'s
            // resources into an unreachable slot.
            // SAFETY: the slot is initialised below, before teardown can run.
            unsafe { self.register_cleanup(drop_value::<T>, slot.cast())? };
        }
        // SAFETY: fresh region sized and aligned for `T`.
        unsafe { slot.as_ptr().write(value) };
        Ok(slot)
    }

    /// Copy `src` into the arena.
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<NonNull<[T]>, ArenaError> {
        let layout = Layout::array::<T>(src.len()).map_err(|_| ArenaError::InvalidLayout {
            size: src.len().saturating_mul(mem::size_of::<T>()),
            align: mem::align_of::<T>(),
        })?;
        let dst = self.allocate_layout(layout)?.cast::<T>();
        // SAFETY: `dst` has room for `src.len()` elements and cannot overlap
        // a live borrow.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len()) };
        Ok(NonNull::slice_from_raw_parts(dst, src.len()))
    }

    /// Copy a string into the arena.
    pub fn alloc_str(&self, src: &str) -> Result<NonNull<str>, ArenaError> {
        let bytes = self.alloc_slice_copy(src.as_bytes())?;
        // SAFETY: `str` and `[u8]` share layout, and the bytes came from a `str`.
        Ok(unsafe { NonNull::new_unchecked(bytes.as_ptr() as *mut str) })
    }

    /// Bytes handed out so far, alignment padding included. Walks the
    /// block chain.
    pub fn bytes_used(&self) -> usize {
        self.store().bytes_used()
    }

    /// Bytes acquired from the backing allocator by this arena.
    pub fn bytes_acquired(&self) -> usize {
        self.store().bytes_acquired()
    }

    /// Blocks in this arena's chain, the initial block included.
    pub fn block_count(&self) -> usize {
        self.store().block_count()
    }

    /// Finalizers registered on this arena that have not run yet.
    pub fn pending_cleanups(&self) -> usize {
        // SAFETY: same exclusivity as `store`.
        unsafe { (*(*self.inner.as_ptr()).cleanups.get()).len() }
    }

    /// Whether this arena was created over caller memory.
    pub fn has_initial_block(&self) -> bool {
        self.store().has_initial_block()
    }

    /// Drop this handle's reference. Equivalent to `drop(arena)`.
    pub fn release(self) {}

    #[cfg(test)]
    pub(crate) fn node_ptr(&self) -> NonNull<ArenaInner> {
        self.inner
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl sealed::Sealed for Arena {
    fn node(&self) -> NonNull<ArenaInner> {
        self.inner
    }
}

impl GroupMember for Arena {}

impl Drop for Arena {
    fn drop(&mut self) {
        fuse::release(self.inner);
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id())
            .field("bytes_used", &self.bytes_used())
            .field("pending_cleanups", &self.pending_cleanups())
            .finish()
    }
}

/// A retained reference to an arena's fused group.
///
/// Cloning retains, dropping releases. Cannot allocate.
pub struct ArenaRef {
    inner: NonNull<ArenaInner>,
}

// SAFETY: only the atomic lifetime state is reachable through an `ArenaRef`.
unsafe impl Send for ArenaRef {}
unsafe impl Sync for ArenaRef {}

impl ArenaRef {
    /// Drop this reference. Equivalent to `drop(arena_ref)`.
    pub fn release(self) {}
}

impl sealed::Sealed for ArenaRef {
    fn node(&self) -> NonNull<ArenaInner> {
        self.inner
    }
}

impl GroupMember for ArenaRef {}

impl Clone for ArenaRef {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl Drop for ArenaRef {
    fn drop(&mut self) {
        fuse::release(self.inner);
    }
}

impl std::fmt::Debug for ArenaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaRef").field("id", &self.id()).finish()
    }
}

// Compile-time assertion: references may cross threads, the allocating
// handle may move between them.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_send<T: Send>() {}
    assert_send_sync::<ArenaRef>();
    assert_send::<Arena>();
};
