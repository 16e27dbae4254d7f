//! Arena configuration parameters.

use crate::error::ArenaError;

/// Configuration for the arena block store.
///
/// Controls how large the blocks requested from the backing allocator
/// are. Validated at arena construction; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Size in bytes of the first block the arena acquires itself.
    ///
    /// Default: 256. Must be at least [`ArenaConfig::MIN_BLOCK_SIZE`].
    pub first_block_size: usize,

    /// Upper bound on the doubling growth target, in bytes.
    ///
    /// Default: 32 KiB. Must be at least `first_block_size`. A single
    /// request larger than this still gets a block big enough to hold it.
    pub max_block_size: usize,
}

impl ArenaConfig {
    /// Default size of the first arena-acquired block.
    pub const DEFAULT_FIRST_BLOCK_SIZE: usize = 256;

    /// Default cap on the growth target.
    pub const DEFAULT_MAX_BLOCK_SIZE: usize = 32 * 1024;

    /// Smallest accepted `first_block_size`.
    pub const MIN_BLOCK_SIZE: usize = 64;

    /// Create a config with the default block sizes.
    pub fn new() -> Self {
        Self {
            first_block_size: Self::DEFAULT_FIRST_BLOCK_SIZE,
            max_block_size: Self::DEFAULT_MAX_BLOCK_SIZE,
        }
    }

    /// Check the invariants documented on each field.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.first_block_size < Self::MIN_BLOCK_SIZE {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "first_block_size must be >= {} (got {})",
                    Self::MIN_BLOCK_SIZE,
                    self.first_block_size
                ),
            });
        }
        if self.max_block_size < self.first_block_size {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_block_size ({}) must be >= first_block_size ({})",
                    self.max_block_size, self.first_block_size
                ),
            });
        }
        Ok(())
    }

    /// Growth policy: size of the next block given the size of the last
    /// acquired block and the number of bytes that must fit in it.
    ///
    /// `last == 0` means no block has been acquired yet. The target doubles
    /// from `last`, is clamped to `[first_block_size, max_block_size]`, and
    /// is never smaller than `request`. Saturates instead of overflowing.
    pub fn next_block_size(&self, last: usize, request: usize) -> usize {
        let target = last
            .saturating_mul(2)
            .max(self.first_block_size)
            .min(self.max_block_size);
        target.max(request)
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}
