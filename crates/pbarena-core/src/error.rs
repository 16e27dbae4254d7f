//! Arena error types.
//!
//! Only recoverable conditions live here. Internal invariant violations
//! (corrupt lifetime words, double teardown, refcount overflow) are fatal
//! and panic or abort at the point of detection.

use std::error::Error;
use std::fmt;

/// Errors returned by arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The backing allocator could not supply a block.
    AllocationFailed {
        /// Number of bytes the caller asked the arena for.
        requested: usize,
        /// Size of the block the arena asked the backing allocator for.
        block_size: usize,
    },
    /// The size/alignment pair cannot describe a valid allocation.
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// The arena configuration was rejected at construction.
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed {
                requested,
                block_size,
            } => {
                write!(
                    f,
                    "arena allocation failed: requested {requested} bytes, block of {block_size} bytes unavailable"
                )
            }
            Self::InvalidLayout { size, align } => {
                write!(f, "invalid layout: size {size}, align {align}")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
        }
    }
}

impl Error for ArenaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_both_sizes() {
        let err = ArenaError::AllocationFailed {
            requested: 16,
            block_size: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("16"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn invalid_config_carries_reason() {
        let err = ArenaError::InvalidConfig {
            reason: "max_block_size too small".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid arena config: max_block_size too small"
        );
    }
}
