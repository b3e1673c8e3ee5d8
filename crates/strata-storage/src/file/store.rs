//! Block store trait.

use strata_common::types::BlockAddress;

use super::error::IoResult;

/// Block-addressed storage backend underneath the page cache.
///
/// Every transfer moves exactly one block of `block_size()` bytes. All
/// operations are position-based so a store can be shared between threads
/// without a common seek position. The cache never holds one of its own
/// locks while calling into the store.
pub trait BlockStore: Send + Sync {
    /// Returns the size in bytes of one block.
    fn block_size(&self) -> usize;

    /// Returns the number of blocks the store currently holds.
    fn block_count(&self) -> u64;

    /// Reads the block at `address` into `buf`.
    ///
    /// Returns the number of bytes read. A count smaller than the block
    /// size means the block lies (partly) beyond the end of the store.
    fn read_block(&self, address: BlockAddress, buf: &mut [u8]) -> IoResult<usize>;

    /// Writes `buf` as the block at `address`, growing the store if needed.
    fn write_block(&self, address: BlockAddress, buf: &[u8]) -> IoResult<()>;

    /// Grows the store by `additional` blocks and returns the new count.
    fn extend(&self, additional: u64) -> IoResult<u64>;

    /// Flushes pending writes to stable storage.
    fn sync(&self) -> IoResult<()>;
}
