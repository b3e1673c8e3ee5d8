//! System-wide constants for Strata.
//!
//! This module defines the defaults and limits used by the page cache.

use std::time::Duration;

// =============================================================================
// Block Constants
// =============================================================================

/// Default cache block size in bytes (8 KB).
///
/// Matches the typical SSD block size and OS page size.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Minimum cache block size in bytes.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Maximum cache block size in bytes (1 MB).
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Byte pattern written into buffers handed out without a backend read.
///
/// Only used in debug builds so that a caller reading an uninitialized
/// write-only buffer sees an obvious marker instead of stale content.
pub const UNINITIALIZED_BLOCK_MARKER: u8 = 0xA5;

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Default number of slots in the pool.
pub const DEFAULT_SLOT_COUNT: usize = 1024;

/// Default number of independent eviction partitions.
pub const DEFAULT_PARTITION_COUNT: usize = 8;

/// Default size of the cold list as a percentage of a partition's
/// ordinary (hot + cold) population.
pub const DEFAULT_COLD_PERCENT: u8 = 30;

/// Default minimum size of the victim area as a percentage of the slots a
/// partition owns.
pub const DEFAULT_VICTIM_PERCENT: u8 = 10;

/// Default next-flush-batch length per partition that fires the preflush
/// callback.
pub const DEFAULT_PREFLUSH_THRESHOLD: usize = 16;

/// Default number of addresses harvested per partition by one preflush scan.
pub const DEFAULT_PREFLUSH_BATCH: usize = 32;

// =============================================================================
// Lock Backoff
// =============================================================================

/// Attempts that busy-spin before a failed second-bucket lock yields.
pub const DEFAULT_SPIN_ATTEMPTS: u32 = 8;

/// Attempts that yield the thread before backoff switches to sleeping.
pub const DEFAULT_YIELD_ATTEMPTS: u32 = 16;

/// Sleep unit for backoff; the actual sleep is scaled by the attempt count.
pub const DEFAULT_BACKOFF_SLEEP: Duration = Duration::from_micros(50);

/// Upper bound on a single backoff sleep.
pub const MAX_BACKOFF_SLEEP: Duration = Duration::from_millis(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_constants() {
        assert!(DEFAULT_BLOCK_SIZE.is_power_of_two());
        assert!(MIN_BLOCK_SIZE.is_power_of_two());
        assert!(MAX_BLOCK_SIZE.is_power_of_two());
        assert!(MIN_BLOCK_SIZE <= DEFAULT_BLOCK_SIZE && DEFAULT_BLOCK_SIZE <= MAX_BLOCK_SIZE);
    }

    #[test]
    fn test_pool_constants() {
        assert!(DEFAULT_PARTITION_COUNT <= DEFAULT_SLOT_COUNT);
        assert!(DEFAULT_COLD_PERCENT <= 100);
        assert!(DEFAULT_VICTIM_PERCENT <= 100);
        assert!(DEFAULT_BACKOFF_SLEEP < MAX_BACKOFF_SLEEP);
    }
}
