//! In-memory block store.
//!
//! Keeps every block in a map and records each transfer, which makes it the
//! backend of choice for exercising the page cache in tests and benchmarks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use strata_common::types::BlockAddress;

use super::error::{IoError, IoResult};
use super::store::BlockStore;

/// Block store held entirely in memory.
///
/// Blocks below `block_count()` that were never written read back as zeros;
/// reads at or past `block_count()` return zero bytes.
pub struct MemoryBlockStore {
    block_size: usize,
    block_count: AtomicU64,
    blocks: RwLock<HashMap<BlockAddress, Box<[u8]>>>,
    /// Addresses in the order they were written.
    write_log: Mutex<Vec<BlockAddress>>,
    /// Addresses in the order they were read.
    read_log: Mutex<Vec<BlockAddress>>,
    syncs: AtomicU64,
    /// Addresses whose writes fail.
    failing_writes: Mutex<HashSet<BlockAddress>>,
    /// Artificial latency added to every read.
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryBlockStore {
    /// Creates a store of `block_count` zeroed blocks.
    pub fn new(block_size: usize, block_count: u64) -> Self {
        Self {
            block_size,
            block_count: AtomicU64::new(block_count),
            blocks: RwLock::new(HashMap::new()),
            write_log: Mutex::new(Vec::new()),
            read_log: Mutex::new(Vec::new()),
            syncs: AtomicU64::new(0),
            failing_writes: Mutex::new(HashSet::new()),
            read_delay: Mutex::new(None),
        }
    }

    /// Returns a copy of the stored block, if it was ever written.
    pub fn block(&self, address: BlockAddress) -> Option<Vec<u8>> {
        self.blocks.read().get(&address).map(|b| b.to_vec())
    }

    /// Stores a block directly, bypassing the write log.
    pub fn preload(&self, address: BlockAddress, data: &[u8]) {
        assert_eq!(data.len(), self.block_size, "preload with wrong block size");
        self.blocks.write().insert(address, data.into());
        self.block_count
            .fetch_max(address.as_u64().saturating_add(1), Ordering::AcqRel);
    }

    /// Returns every written address in write order.
    pub fn write_log(&self) -> Vec<BlockAddress> {
        self.write_log.lock().clone()
    }

    /// Returns every read address in read order.
    pub fn read_log(&self) -> Vec<BlockAddress> {
        self.read_log.lock().clone()
    }

    /// Returns how many times `address` was written.
    pub fn writes_to(&self, address: BlockAddress) -> usize {
        self.write_log.lock().iter().filter(|a| **a == address).count()
    }

    /// Returns how many times `address` was read.
    pub fn reads_of(&self, address: BlockAddress) -> usize {
        self.read_log.lock().iter().filter(|a| **a == address).count()
    }

    /// Returns the number of `sync` calls.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Makes every write to `address` fail until cleared.
    pub fn fail_writes_to(&self, address: BlockAddress) {
        self.failing_writes.lock().insert(address);
    }

    /// Clears all injected write failures.
    pub fn clear_failures(&self) {
        self.failing_writes.lock().clear();
    }

    /// Delays every subsequent read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    fn check_len(&self, len: usize) -> IoResult<()> {
        if len == self.block_size {
            Ok(())
        } else {
            Err(IoError::block_size_mismatch(self.block_size, len))
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Acquire)
    }

    fn read_block(&self, address: BlockAddress, buf: &mut [u8]) -> IoResult<usize> {
        self.check_len(buf.len())?;
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.read_log.lock().push(address);

        if address.as_u64() >= self.block_count() {
            return Ok(0);
        }
        match self.blocks.read().get(&address) {
            Some(block) => buf.copy_from_slice(block),
            None => buf.fill(0),
        }
        Ok(buf.len())
    }

    fn write_block(&self, address: BlockAddress, buf: &[u8]) -> IoResult<()> {
        self.check_len(buf.len())?;
        if self.failing_writes.lock().contains(&address) {
            return Err(IoError::injected(format!("write to block {address}")));
        }
        self.blocks.write().insert(address, buf.into());
        self.block_count
            .fetch_max(address.as_u64().saturating_add(1), Ordering::AcqRel);
        self.write_log.lock().push(address);
        Ok(())
    }

    fn extend(&self, additional: u64) -> IoResult<u64> {
        let previous = self.block_count.fetch_add(additional, Ordering::AcqRel);
        Ok(previous.saturating_add(additional))
    }

    fn sync(&self) -> IoResult<()> {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockStore")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count())
            .field("stored", &self.blocks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_blocks_read_as_zero() {
        let store = MemoryBlockStore::new(16, 8);
        let mut buf = [9u8; 16];
        assert_eq!(store.read_block(BlockAddress::new(3), &mut buf).unwrap(), 16);
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(store.reads_of(BlockAddress::new(3)), 1);
    }

    #[test]
    fn test_read_past_end() {
        let store = MemoryBlockStore::new(16, 2);
        let mut buf = [0u8; 16];
        assert_eq!(store.read_block(BlockAddress::new(2), &mut buf).unwrap(), 0);

        assert_eq!(store.extend(1).unwrap(), 3);
        assert_eq!(store.read_block(BlockAddress::new(2), &mut buf).unwrap(), 16);
    }

    #[test]
    fn test_write_log() {
        let store = MemoryBlockStore::new(4, 0);
        store.write_block(BlockAddress::new(5), b"abcd").unwrap();
        store.write_block(BlockAddress::new(1), b"efgh").unwrap();
        store.write_block(BlockAddress::new(5), b"ijkl").unwrap();

        assert_eq!(
            store.write_log(),
            vec![BlockAddress::new(5), BlockAddress::new(1), BlockAddress::new(5)]
        );
        assert_eq!(store.writes_to(BlockAddress::new(5)), 2);
        assert_eq!(store.block(BlockAddress::new(5)).unwrap(), b"ijkl");
        assert_eq!(store.block_count(), 6);
    }

    #[test]
    fn test_injected_write_failure() {
        let store = MemoryBlockStore::new(4, 4);
        store.fail_writes_to(BlockAddress::new(2));
        let err = store.write_block(BlockAddress::new(2), b"abcd").unwrap_err();
        assert!(matches!(err, IoError::Injected { .. }));
        assert!(store.block(BlockAddress::new(2)).is_none());

        store.clear_failures();
        store.write_block(BlockAddress::new(2), b"abcd").unwrap();
        assert_eq!(store.writes_to(BlockAddress::new(2)), 1);
    }

    #[test]
    fn test_sync_counter() {
        let store = MemoryBlockStore::new(4, 4);
        store.sync().unwrap();
        store.sync().unwrap();
        assert_eq!(store.sync_count(), 2);
    }
}
