//! Allocation tracking (feature `alloc-tracking`).
//!
//! Records which slot each address was bound to by `set_address`/`relocate`
//! and forgets it when the block is discarded or moved away, so a leaked
//! binding can be found in the dump.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use strata_common::types::BlockAddress;

use super::slot::SlotId;

/// Address-ordered record of explicit bindings.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    bindings: BTreeMap<BlockAddress, SlotId>,
}

impl AllocationTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `address` was bound to `slot`.
    pub fn record(&mut self, address: BlockAddress, slot: SlotId) {
        self.bindings.insert(address, slot);
    }

    /// Forgets `address`.
    pub fn forget(&mut self, address: BlockAddress) -> Option<SlotId> {
        self.bindings.remove(&address)
    }

    /// Returns the slot recorded for `address`.
    pub fn get(&self, address: BlockAddress) -> Option<SlotId> {
        self.bindings.get(&address).copied()
    }

    /// Returns the number of recorded bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Renders every record, one `address -> slot` per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (address, slot) in &self.bindings {
            let _ = writeln!(out, "{address} -> slot {slot}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_forget_dump() {
        let mut tracker = AllocationTracker::new();
        tracker.record(BlockAddress::new(9), SlotId::new(1));
        tracker.record(BlockAddress::new(2), SlotId::new(4));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get(BlockAddress::new(9)), Some(SlotId::new(1)));
        assert_eq!(tracker.dump(), "2 -> slot 4\n9 -> slot 1\n");

        assert_eq!(tracker.forget(BlockAddress::new(2)), Some(SlotId::new(4)));
        assert_eq!(tracker.forget(BlockAddress::new(2)), None);
        assert_eq!(tracker.len(), 1);
    }
}
