//! Core types for the pbarena message arena.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the allocator crate and its consumers:
//! the error type, the block growth configuration, and arena identifiers.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod id;

pub use config::ArenaConfig;
pub use error::ArenaError;
pub use id::ArenaId;
