//! Core identifier types for Strata.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of block addresses and flush epochs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Block address - identifies one fixed-size block on the backing store.
///
/// Blocks are the unit the page cache reads, writes and caches. The address
/// is an index into the store, not a byte offset; the byte offset is
/// `address * block_size`.
///
/// # Example
///
/// ```rust
/// use strata_common::types::BlockAddress;
///
/// let addr = BlockAddress::new(42);
/// assert_eq!(addr.as_u64(), 42);
/// assert_eq!(addr.byte_offset(4096), Some(42 * 4096));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockAddress(u64);

impl BlockAddress {
    /// First block on the store.
    pub const FIRST: Self = Self(0);

    /// Largest representable block address.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new `BlockAddress` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next block address.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the byte offset of this block for the given block size, or
    /// `None` if it does not fit in a u64.
    #[inline]
    #[must_use]
    pub const fn byte_offset(self, block_size: usize) -> Option<u64> {
        self.0.checked_mul(block_size as u64)
    }

    /// Creates a `BlockAddress` from bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Converts to bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockAddress({})", self.0)
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockAddress {
    #[inline]
    fn from(addr: u64) -> Self {
        Self::new(addr)
    }
}

impl From<BlockAddress> for u64 {
    #[inline]
    fn from(addr: BlockAddress) -> Self {
        addr.0
    }
}

/// Flush generation - the checkpoint epoch a cached block was last known
/// clean in.
///
/// Generations increase monotonically. A dirty block whose recorded
/// generation is older than the current one still has to be written before
/// the current checkpoint is durable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FlushGeneration(u64);

impl FlushGeneration {
    /// Generation every block starts in.
    pub const INITIAL: Self = Self(0);

    /// Creates a new `FlushGeneration` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the generation that follows this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns true if this generation precedes `other`.
    #[inline]
    #[must_use]
    pub const fn is_older_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Debug for FlushGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlushGeneration({})", self.0)
    }
}

impl fmt::Display for FlushGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FlushGeneration {
    #[inline]
    fn from(generation: u64) -> Self {
        Self::new(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_address() {
        let addr = BlockAddress::new(42);
        assert_eq!(addr.as_u64(), 42);
        assert_eq!(addr.next().as_u64(), 43);
        assert_eq!(BlockAddress::MAX.next(), BlockAddress::MAX);

        let bytes = addr.to_be_bytes();
        assert_eq!(BlockAddress::from_be_bytes(bytes), addr);
    }

    #[test]
    fn test_byte_offset() {
        assert_eq!(BlockAddress::new(3).byte_offset(16), Some(48));
        assert_eq!(BlockAddress::MAX.byte_offset(1), Some(u64::MAX));
        assert_eq!(BlockAddress::MAX.byte_offset(4096), None);
        assert_eq!(BlockAddress::new(u64::MAX / 8).byte_offset(16), None);
    }

    #[test]
    fn test_flush_generation() {
        let gen = FlushGeneration::INITIAL;
        let next = gen.next();
        assert!(gen.is_older_than(next));
        assert!(!next.is_older_than(gen));
        assert!(!next.is_older_than(next));
        assert_eq!(next.as_u64(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(BlockAddress::new(7).to_string(), "7");
        assert_eq!(format!("{:?}", BlockAddress::new(7)), "BlockAddress(7)");
        assert_eq!(FlushGeneration::new(3).to_string(), "3");
    }
}
