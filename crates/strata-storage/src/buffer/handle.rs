//! Slot handles.
//!
//! A [`SlotHandle`] is one hold on a reached slot. It is consumed by
//! [`SlotHandle::release`]; dropping it without releasing gives the hold back
//! as `Clean` (or discards a slot that was never bound).

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use strata_common::types::BlockAddress;
use tracing::warn;

use super::error::BufferResult;
use super::pool::{check_address, BufferPool};
use super::request::{Purpose, ReleaseMode};
use super::slot::{Hold, Payload, SlotId};

/// A hold on a cache slot.
pub struct SlotHandle<'a> {
    pool: &'a BufferPool,
    slot: SlotId,
    hold: Hold,
    purpose: Purpose,
    released: bool,
}

impl<'a> SlotHandle<'a> {
    pub(crate) fn new(pool: &'a BufferPool, slot: SlotId, hold: Hold, purpose: Purpose) -> Self {
        debug_assert!(matches!(hold, Hold::Shared | Hold::Exclusive), "handle for {hold:?} hold");
        Self {
            pool,
            slot,
            hold,
            purpose,
            released: false,
        }
    }

    /// Returns the slot ID.
    #[inline]
    pub fn slot_id(&self) -> SlotId {
        self.slot
    }

    /// Returns the bound address, `None` for a fresh `Alloc` slot.
    #[inline]
    pub fn address(&self) -> Option<BlockAddress> {
        self.pool.slot(self.slot).address()
    }

    /// Returns true if this handle holds the slot exclusively.
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.hold == Hold::Exclusive
    }

    /// Returns true if the slot holds changes not yet written.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.pool.slot(self.slot).is_dirty()
    }

    /// Returns true if another slot has taken over this slot's address.
    ///
    /// A stale handle still reads the content it was granted; it is
    /// discarded on its last release.
    pub fn is_stale(&self) -> bool {
        self.pool.is_stale(self.slot)
    }

    /// Returns the block content.
    pub fn data(&self) -> impl Deref<Target = [u8]> + '_ {
        SlotData {
            guard: self.pool.slot(self.slot).read_data(),
        }
    }

    /// Returns the block content for modification.
    ///
    /// # Panics
    ///
    /// Panics on a shared hold.
    pub fn data_mut(&mut self) -> impl DerefMut<Target = [u8]> + '_ {
        assert!(self.is_exclusive(), "slot {} modified through a shared hold", self.slot);
        SlotDataMut {
            guard: self.pool.slot(self.slot).write_data(),
        }
    }

    /// Binds the slot to `address` and marks it dirty.
    ///
    /// A slot already cached at `address` is dropped without being written
    /// when idle, or made stale when held.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` for the reserved [`BlockAddress::MAX`]; the
    /// binding is left unchanged.
    ///
    /// # Panics
    ///
    /// Panics on a shared hold.
    pub fn set_address(&mut self, address: BlockAddress) -> BufferResult<()> {
        assert!(self.is_exclusive(), "slot {} rebound through a shared hold", self.slot);
        check_address(address)?;
        self.pool.rebind(self.slot, address);
        Ok(())
    }

    /// Moves the content to `address`.
    ///
    /// An exclusive hold is rebound in place. A shared hold is copied into a
    /// fresh slot first; the returned handle is always exclusive.
    pub fn relocate(mut self, address: BlockAddress) -> BufferResult<SlotHandle<'a>> {
        check_address(address)?;
        if self.is_exclusive() {
            self.set_address(address)?;
            return Ok(self);
        }

        let pool = self.pool;
        let copy = pool.copy_to_unbound(self.slot)?;
        let mut moved = SlotHandle::new(pool, copy, Hold::Exclusive, Purpose::Caller);
        moved.set_address(address)?;
        self.release(ReleaseMode::clean())?;
        Ok(moved)
    }

    /// Attaches a payload to the slot.
    ///
    /// Returns false if one is already attached.
    pub fn attach_payload(&self, payload: Payload) -> bool {
        self.pool.attach_payload(self.slot, payload)
    }

    /// Returns the attached payload.
    pub fn payload(&self) -> Option<Payload> {
        self.pool.payload(self.slot)
    }

    /// Gives the hold back.
    ///
    /// # Errors
    ///
    /// Only a `Flush` release can fail, with the write error. The slot is
    /// released and stays dirty.
    ///
    /// # Panics
    ///
    /// Panics on a `Dirty` or `Flush` release of a shared hold.
    pub fn release(mut self, mode: ReleaseMode) -> BufferResult<()> {
        self.released = true;
        self.pool.release_slot(self.slot, self.hold, mode, self.purpose)
    }
}

impl Drop for SlotHandle<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mode = if self.address().is_none() {
            ReleaseMode::discard()
        } else {
            ReleaseMode::clean()
        };
        if let Err(err) = self.pool.release_slot(self.slot, self.hold, mode, self.purpose) {
            warn!(slot = %self.slot, error = %err, "release on drop failed");
        }
    }
}

impl std::fmt::Debug for SlotHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("slot", &self.slot)
            .field("address", &self.address())
            .field("hold", &self.hold)
            .finish()
    }
}

struct SlotData<'a> {
    guard: RwLockReadGuard<'a, Box<[u8]>>,
}

impl Deref for SlotData<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

struct SlotDataMut<'a> {
    guard: RwLockWriteGuard<'a, Box<[u8]>>,
}

impl Deref for SlotDataMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SlotDataMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer::{BufferPoolConfig, ReachRequest};
    use crate::file::MemoryBlockStore;

    fn addr(n: u64) -> BlockAddress {
        BlockAddress::new(n)
    }

    fn create_test_pool() -> (BufferPool, Arc<MemoryBlockStore>) {
        let store = Arc::new(MemoryBlockStore::new(16, 32));
        let config = BufferPoolConfig::new(4).with_block_size(16).with_partitions(1);
        (BufferPool::new(config, store.clone()).unwrap(), store)
    }

    #[test]
    fn test_drop_releases_clean() {
        let (pool, _) = create_test_pool();
        {
            let _h = pool.reach(Some(addr(1)), ReachRequest::read()).unwrap().unwrap();
            assert_eq!(pool.stats().in_use_slots, 1);
        }
        assert_eq!(pool.stats().in_use_slots, 0);
        assert!(pool.contains(addr(1)));
    }

    #[test]
    fn test_drop_discards_unbound_alloc() {
        let (pool, _) = create_test_pool();
        {
            let mut h = pool.reach(None, ReachRequest::alloc()).unwrap().unwrap();
            assert_eq!(h.address(), None);
            h.data_mut().fill(3);
        }
        assert_eq!(pool.stats().in_use_slots, 0);
        assert_eq!(pool.dirty_count(), 0);
    }

    #[test]
    #[should_panic(expected = "shared hold")]
    fn test_data_mut_requires_exclusive() {
        let (pool, _) = create_test_pool();
        let mut h = pool.reach(Some(addr(1)), ReachRequest::read()).unwrap().unwrap();
        let _ = h.data_mut();
    }

    #[test]
    fn test_data_roundtrip_through_store() {
        let (pool, store) = create_test_pool();
        let mut h = pool.reach(Some(addr(2)), ReachRequest::write()).unwrap().unwrap();
        h.data_mut().copy_from_slice(b"0123456789abcdef");
        assert!(h.is_exclusive());
        h.release(ReleaseMode::flush()).unwrap();
        assert_eq!(store.block(addr(2)).unwrap(), b"0123456789abcdef".to_vec());
    }

    #[test]
    fn test_relocate_exclusive_in_place() {
        let (pool, _) = create_test_pool();
        let h = pool.reach(Some(addr(1)), ReachRequest::read_write()).unwrap().unwrap();
        let id = h.slot_id();
        let h = h.relocate(addr(7)).unwrap();
        assert_eq!(h.slot_id(), id);
        assert_eq!(h.address(), Some(addr(7)));
        assert!(h.is_dirty());
        h.release(ReleaseMode::dirty()).unwrap();
        assert!(!pool.contains(addr(1)));
        assert!(pool.contains(addr(7)));
    }

    #[test]
    fn test_relocate_shared_copies() {
        let (pool, store) = create_test_pool();
        store.preload(addr(1), &[5u8; 16]);
        let h = pool.reach(Some(addr(1)), ReachRequest::read()).unwrap().unwrap();
        let id = h.slot_id();
        let moved = h.relocate(addr(8)).unwrap();
        assert_ne!(moved.slot_id(), id);
        assert!(moved.is_exclusive());
        assert_eq!(&moved.data()[..], &[5u8; 16]);
        moved.release(ReleaseMode::dirty()).unwrap();
        assert!(pool.contains(addr(1)));
        assert!(pool.contains(addr(8)));
    }
}
