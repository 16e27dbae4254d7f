//! pbarena: fusable, reference-counted bump arenas.
//!
//! This is the top-level facade crate that re-exports the public API of the
//! pbarena sub-crates. Adding `pbarena` as a single dependency is enough for
//! most users.
//!
//! # Quick start
//!
//! ```rust
//! use pbarena::prelude::*;
//!
//! // Two independent decodes, each into its own arena.
//! let request = Arena::new();
//! let name = request.alloc_str("customer-42").unwrap();
//!
//! let response = Arena::new();
//! let body = response.alloc_value(vec![1u32, 2, 3]).unwrap();
//!
//! // Link them: neither arena's memory is freed until both are released.
//! request.fuse(&response);
//! assert!(request.is_fused_with(&response));
//! assert_eq!(request.ref_count(), 2);
//!
//! // Hand a reference to another thread.
//! let shared: ArenaRef = response.retain();
//! std::thread::spawn(move || drop(shared)).join().unwrap();
//!
//! drop(request);
//! // `name` still points into the live group.
//! assert_eq!(unsafe { name.as_ref() }, "customer-42");
//! assert_eq!(unsafe { body.as_ref() }.len(), 3);
//! drop(response);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `pbarena-core` | `ArenaConfig`, `ArenaError`, `ArenaId` |
//! | [`mem`] | `pbarena-mem` | Arenas, group handles, backing allocators, finalizers |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Configuration, errors and identifiers (`pbarena-core`).
pub use pbarena_core as types;

/// Arenas and their lifetime groups (`pbarena-mem`).
///
/// [`mem::Arena`] allocates; [`mem::ArenaRef`] is a shareable reference
/// that keeps a fused group alive. Custom block sources implement
/// [`mem::BlockAlloc`].
pub use pbarena_mem as mem;

/// Common imports for typical pbarena usage.
///
/// ```rust
/// use pbarena::prelude::*;
/// ```
pub mod prelude {
    // Handles
    pub use pbarena_mem::{Arena, ArenaRef, GroupMember};

    // Backing memory
    pub use pbarena_mem::{BlockAlloc, SystemAlloc};

    // Configuration and errors
    pub use pbarena_core::{ArenaConfig, ArenaError};
}
