//! Raw memory blocks and the per-arena block chain.
//!
//! A [`BlockStore`] bump-allocates out of its current block and grows into
//! a new, larger block from the backing allocator when the current one is
//! exhausted. Blocks form a singly linked chain (newest first) so the whole
//! chain can be returned in one pass. Individual allocations are never
//! reclaimed; the only reclamation unit is the whole chain.

use std::alloc::Layout;
use std::iter;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use pbarena_core::{ArenaConfig, ArenaError, ArenaId};

use crate::alloc::BlockAlloc;

/// Alignment of every block acquired from the backing allocator.
pub(crate) const BLOCK_ALIGN: usize = 16;

/// Bookkeeping written at the start of every block.
#[repr(C)]
struct BlockHeader {
    /// Next older block in the chain.
    prev: Option<NonNull<BlockHeader>>,
    /// Total block size in bytes, header included.
    size: usize,
    /// Bytes handed out from this block. Only maintained for retired blocks;
    /// the current block's usage is derived from the cursor.
    used: usize,
    /// False for a caller-supplied initial block, which is never freed.
    owned: bool,
}

/// Header footprint, rounded so that data starts `BLOCK_ALIGN`-aligned.
const HEADER_SIZE: usize = (mem::size_of::<BlockHeader>() + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1);

/// Bytes needed to round `addr` up to `align`, or `None` if that overflows.
///
/// `align` must be a power of two.
fn padding_for(addr: usize, align: usize) -> Option<usize> {
    let aligned = addr.checked_add(align - 1)? & !(align - 1);
    Some(aligned - addr)
}

/// Bump allocator over a chain of blocks.
///
/// Not synchronised: the owning arena handle is the only writer.
pub(crate) struct BlockStore {
    /// Arena this store belongs to (for log events).
    owner: ArenaId,
    /// Current block, or `None` before the first allocation.
    head: Option<NonNull<BlockHeader>>,
    /// Next free byte in the current block.
    cursor: *mut u8,
    /// One past the last byte of the current block.
    end: *mut u8,
    /// Size of the last block acquired for general use (drives growth).
    last_size: usize,
    /// Total bytes acquired from the backing allocator.
    acquired: usize,
    has_initial: bool,
    config: ArenaConfig,
    alloc: Arc<dyn BlockAlloc>,
}

impl BlockStore {
    /// Create an empty store. No block is acquired until the first
    /// allocation.
    pub(crate) fn new(owner: ArenaId, config: ArenaConfig, alloc: Arc<dyn BlockAlloc>) -> Self {
        Self {
            owner,
            head: None,
            cursor: ptr::null_mut(),
            end: ptr::null_mut(),
            last_size: 0,
            acquired: 0,
            has_initial: false,
            config,
            alloc,
        }
    }

    /// Create a store that serves allocations from caller memory first.
    ///
    /// A region too small to hold a block header is ignored.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + len` must be writable and must stay valid, and otherwise
    /// untouched, until this store is dropped.
    pub(crate) unsafe fn with_initial_block(
        owner: ArenaId,
        config: ArenaConfig,
        alloc: Arc<dyn BlockAlloc>,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Self {
        let mut store = Self::new(owner, config, alloc);
        let pad = padding_for(ptr.as_ptr() as usize, mem::align_of::<BlockHeader>())
            .filter(|pad| pad.checked_add(HEADER_SIZE).is_some_and(|needed| needed <= len));
        if let Some(pad) = pad {
            // SAFETY: header and the rest of the region lie within the
            // caller-supplied `len` bytes, and `pad` aligns the header.
            unsafe {
                let header = ptr.as_ptr().add(pad).cast::<BlockHeader>();
                header.write(BlockHeader {
                    prev: None,
                    size: len - pad,
                    used: 0,
                    owned: false,
                });
                store.head = Some(NonNull::new_unchecked(header));
                store.cursor = header.cast::<u8>().add(HEADER_SIZE);
                store.end = ptr.as_ptr().add(len);
            }
            store.has_initial = true;
        }
        store
    }

    pub(crate) fn owner(&self) -> ArenaId {
        self.owner
    }

    /// Bump-allocate a region for `layout`, growing into a new block if the
    /// current one cannot hold it.
    ///
    /// Zero-sized requests return a dangling, suitably aligned pointer and
    /// never touch the block chain.
    pub(crate) fn alloc(&mut self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        if layout.size() == 0 {
            // SAFETY: alignment is a non-zero power of two.
            return Ok(unsafe {
                NonNull::new_unchecked(ptr::without_provenance_mut(layout.align()))
            });
        }
        if let Some(region) = self.bump(layout) {
            return Ok(region);
        }
        self.grow(layout)
    }

    fn bump(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let pad = padding_for(self.cursor as usize, layout.align())?;
        let needed = pad.checked_add(layout.size())?;
        if needed > self.remaining() {
            return None;
        }
        // SAFETY: `cursor + needed <= end`, so both pointers stay inside the
        // current block.
        unsafe {
            let start = self.cursor.add(pad);
            self.cursor = start.add(layout.size());
            Some(NonNull::new_unchecked(start))
        }
    }

    fn grow(&mut self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        let invalid = || ArenaError::InvalidLayout {
            size: layout.size(),
            align: layout.align(),
        };
        // Worst case: data starts BLOCK_ALIGN-aligned and must be padded up
        // to the requested alignment.
        let request = HEADER_SIZE
            .checked_add(layout.size())
            .and_then(|n| n.checked_add(layout.align().saturating_sub(BLOCK_ALIGN)))
            .ok_or_else(invalid)?;
        let target = self.config.next_block_size(self.last_size, 0);
        let oversized = self.head.is_some() && request > target;
        let block_size = if oversized {
            request
        } else {
            self.config.next_block_size(self.last_size, request)
        };
        let block_layout = Layout::from_size_align(block_size, BLOCK_ALIGN).map_err(|_| invalid())?;

        let Some(raw) = self.alloc.alloc_block(block_layout) else {
            tracing::warn!(
                arena = %self.owner,
                requested = layout.size(),
                block_size,
                "backing allocator refused block"
            );
            return Err(ArenaError::AllocationFailed {
                requested: layout.size(),
                block_size,
            });
        };
        let data_addr = raw.as_ptr() as usize + HEADER_SIZE;
        let pad = padding_for(data_addr, layout.align())
            .filter(|pad| HEADER_SIZE + pad + layout.size() <= block_size);
        let Some(pad) = pad else {
            // SAFETY: acquired just above with `block_layout` and not yet
            // linked anywhere.
            unsafe { self.alloc.free_block(raw, block_layout) };
            return Err(invalid());
        };
        self.acquired += block_size;
        tracing::trace!(
            arena = %self.owner,
            block_size,
            request = layout.size(),
            oversized,
            "acquired block"
        );

        let header = raw.cast::<BlockHeader>();
        // SAFETY: `raw` is a fresh block of `block_size` bytes aligned to
        // BLOCK_ALIGN, and the header plus the padded region fit in it.
        unsafe {
            let start = raw.as_ptr().add(HEADER_SIZE + pad);

            match self.head {
                Some(mut current) if oversized => {
                    // Slot the dedicated block behind the current one so the
                    // current block keeps serving small requests.
                    header.as_ptr().write(BlockHeader {
                        prev: current.as_ref().prev,
                        size: block_size,
                        used: pad + layout.size(),
                        owned: true,
                    });
                    current.as_mut().prev = Some(header);
                }
                _ => {
                    self.retire_current();
                    header.as_ptr().write(BlockHeader {
                        prev: self.head,
                        size: block_size,
                        used: 0,
                        owned: true,
                    });
                    self.head = Some(header);
                    self.cursor = start.add(layout.size());
                    self.end = raw.as_ptr().add(block_size);
                    self.last_size = block_size;
                }
            }
            Ok(NonNull::new_unchecked(start))
        }
    }

    /// Record the current block's usage in its header before it stops
    /// being the bump target.
    fn retire_current(&mut self) {
        if let Some(mut head) = self.head {
            let used = self.cursor as usize - Self::data_start(head) as usize;
            // SAFETY: `head` is a live header owned by this store.
            unsafe { head.as_mut().used = used };
        }
    }

    fn data_start(header: NonNull<BlockHeader>) -> *mut u8 {
        // SAFETY: every block is at least HEADER_SIZE bytes long.
        unsafe { header.as_ptr().cast::<u8>().add(HEADER_SIZE) }
    }

    fn blocks(&self) -> impl Iterator<Item = NonNull<BlockHeader>> + '_ {
        // SAFETY: the chain only links live headers written by this store.
        iter::successors(self.head, |header| unsafe { header.as_ref().prev })
    }

    /// Free bytes left in the current block.
    pub(crate) fn remaining(&self) -> usize {
        self.end as usize - self.cursor as usize
    }

    /// Bytes handed out across all blocks, alignment padding included.
    ///
    /// Walks the whole chain.
    pub(crate) fn bytes_used(&self) -> usize {
        self.blocks()
            .map(|header| {
                if Some(header) == self.head {
                    self.cursor as usize - Self::data_start(header) as usize
                } else {
                    // SAFETY: live header in this store's chain.
                    unsafe { header.as_ref().used }
                }
            })
            .sum()
    }

    /// Total bytes acquired from the backing allocator.
    pub(crate) fn bytes_acquired(&self) -> usize {
        self.acquired
    }

    /// Number of blocks in the chain, initial block included.
    pub(crate) fn block_count(&self) -> usize {
        self.blocks().count()
    }

    /// Whether the chain starts from caller-supplied memory.
    pub(crate) fn has_initial_block(&self) -> bool {
        self.has_initial
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(header) = next {
            // SAFETY: headers stay valid until their block is freed below.
            let BlockHeader {
                prev, size, owned, ..
            } = unsafe { header.as_ptr().read() };
            next = prev;
            if owned {
                // SAFETY: the same size/align pair was validated when the
                // block was acquired from this allocator.
                unsafe {
                    let layout = Layout::from_size_align_unchecked(size, BLOCK_ALIGN);
                    self.alloc.free_block(header.cast(), layout);
                }
            }
        }
    }
}
