//! Fusable, reference-counted bump arenas.
//!
//! Every decoded message, string copy and auxiliary structure of the
//! serialization runtime is carved out of an arena and released in bulk.
//! Arenas created independently can be *fused* so that their memory lives
//! and dies together, which is what lets a message from one parse be linked
//! into a tree owned by another.
//!
//! # Architecture
//!
//! ```text
//! Arena / ArenaRef (handles, one group reference each)
//! └── ArenaInner (heap node, one per arena)
//!     ├── LifetimeNode  tagged word: Parent(ptr) | Root(count)
//!     ├── next / tail   lock-free member list of the fused group
//!     ├── BlockStore    bump cursor over a chain of blocks
//!     └── CleanupList   finalizers stored inside the blocks
//! ```
//!
//! Allocation only touches the arena's own block store and is not
//! synchronised. Retain, release and fuse only touch lifetime words and
//! member lists, with compare-and-swap retry loops and no locks. Dropping
//! the last reference to a group runs every member's finalizers, then
//! returns every member's blocks to their backing allocators.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
pub mod arena;
mod block;
pub mod cleanup;
mod fuse;
mod node;
mod sync;
mod tagged;

// Public re-exports for the primary API surface.
pub use alloc::{BlockAlloc, SystemAlloc};
pub use arena::{Arena, ArenaRef, GroupMember};
pub use cleanup::Finalizer;
pub use pbarena_core::{ArenaConfig, ArenaError, ArenaId};
