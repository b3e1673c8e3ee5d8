//! Address to slot hash index.
//!
//! A fixed array of independently locked buckets. A bucket is a short chain
//! of `(address, slot)` entries; bucket `i` holds every bound address with
//! `address % bucket_count == i`.

use parking_lot::{Mutex, MutexGuard};
use strata_common::types::BlockAddress;

use super::slot::SlotId;
use super::ChainStats;

/// One hash chain.
#[derive(Debug, Default)]
pub(crate) struct Bucket {
    entries: Vec<(BlockAddress, SlotId)>,
}

impl Bucket {
    /// Returns the slot bound to `address`.
    #[inline]
    pub fn find(&self, address: BlockAddress) -> Option<SlotId> {
        self.entries
            .iter()
            .find(|(addr, _)| *addr == address)
            .map(|(_, slot)| *slot)
    }

    /// Binds `address` to `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the address is already bound.
    pub fn insert(&mut self, address: BlockAddress, slot: SlotId) {
        assert!(
            self.find(address).is_none(),
            "block {address} is already bound to a slot"
        );
        self.entries.push((address, slot));
    }

    /// Removes the binding of `address`.
    pub fn remove(&mut self, address: BlockAddress) -> Option<SlotId> {
        let pos = self.entries.iter().position(|(addr, _)| *addr == address)?;
        Some(self.entries.swap_remove(pos).1)
    }

    /// Removes the binding of `address` if it points at `slot`.
    pub fn remove_slot(&mut self, address: BlockAddress, slot: SlotId) -> bool {
        match self.entries.iter().position(|e| *e == (address, slot)) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Rebinds `address` to `slot`, returning the previous slot.
    pub fn replace(&mut self, address: BlockAddress, slot: SlotId) -> Option<SlotId> {
        match self.entries.iter_mut().find(|(addr, _)| *addr == address) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, slot)),
            None => {
                self.entries.push((address, slot));
                None
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over the bindings in the chain.
    pub fn iter(&self) -> impl Iterator<Item = (BlockAddress, SlotId)> + '_ {
        self.entries.iter().copied()
    }
}

/// The hash index.
pub(crate) struct HashIndex {
    buckets: Box<[Mutex<Bucket>]>,
}

impl HashIndex {
    pub fn new(bucket_count: usize) -> Self {
        let buckets = (0..bucket_count.max(1))
            .map(|_| Mutex::new(Bucket::default()))
            .collect();
        Self { buckets }
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the bucket index of `address`.
    #[inline]
    pub fn bucket_of(&self, address: BlockAddress) -> usize {
        // The remainder is below the bucket count, which is a usize.
        (address.as_u64() % self.buckets.len() as u64) as usize
    }

    #[inline]
    pub fn lock(&self, bucket: usize) -> MutexGuard<'_, Bucket> {
        self.buckets[bucket].lock()
    }

    /// Locks a bucket without blocking.
    #[inline]
    pub fn try_lock(&self, bucket: usize) -> Option<MutexGuard<'_, Bucket>> {
        self.buckets[bucket].try_lock()
    }

    /// Looks up `address` under its bucket lock.
    pub fn find(&self, address: BlockAddress) -> Option<SlotId> {
        self.lock(self.bucket_of(address)).find(address)
    }

    /// Returns the total number of bound addresses.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    /// Returns chain length statistics.
    pub fn chain_stats(&self) -> ChainStats {
        let mut stats = ChainStats {
            buckets: self.buckets.len(),
            ..ChainStats::default()
        };
        for bucket in self.buckets.iter() {
            let len = bucket.lock().len();
            if len > 0 {
                stats.non_empty += 1;
                stats.entries += len;
                stats.max_chain = stats.max_chain.max(len);
            }
        }
        stats
    }
}

impl std::fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashIndex")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
