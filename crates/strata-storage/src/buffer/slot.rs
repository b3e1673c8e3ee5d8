//! Cache slot - a reusable block buffer plus its binding and holder state.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use strata_common::types::{BlockAddress, FlushGeneration};

use super::eviction::ListKind;
use super::wait::WaitQueue;

/// Opaque per-slot value owned by the layer above the cache.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Slot identifier - index into the pool's slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// Creates a new slot ID.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access currently granted on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hold {
    /// No holders.
    Idle,
    /// One or more readers.
    Shared,
    /// A single writer.
    Exclusive,
    /// Being filled from the store by the reach that bound it.
    Loading,
}

/// Mutable slot metadata.
///
/// Guarded by the slot's own mutex, which is only taken while holding the
/// bucket lock of the slot's address (or, for an unbound slot, by its sole
/// holder).
pub(crate) struct SlotState {
    pub hold: Hold,
    pub in_use: u32,
    /// Shared holds taken to write the slot out (checkpoint, preflush or
    /// victim write-back). While any exist the content must not be
    /// replicated.
    pub flush_holds: u32,
    /// Set once a replica or a relocated slot took over this slot's address.
    /// The slot is out of the hash index and is discarded on last release.
    pub superseded_by: Option<SlotId>,
    /// Loaded by read-ahead and not yet reached by anyone else.
    pub read_ahead: bool,
    /// Eviction list the slot was unlinked from when first reached.
    pub prior_list: Option<ListKind>,
    pub waiters: WaitQueue,
    pub payload: Option<Payload>,
}

impl SlotState {
    fn new() -> Self {
        Self {
            hold: Hold::Idle,
            in_use: 0,
            flush_holds: 0,
            superseded_by: None,
            read_ahead: false,
            prior_list: None,
            waiters: WaitQueue::new(),
            payload: None,
        }
    }

    /// Returns true if the slot was replaced and must not be reused as is.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Clears everything tied to the previous binding.
    pub fn reset_binding(&mut self) {
        self.superseded_by = None;
        self.read_ahead = false;
        self.prior_list = None;
        self.payload = None;
    }
}

const UNBOUND: u64 = BlockAddress::MAX.as_u64();

/// A cache slot.
///
/// The address, dirty flag, flush generation and preflush mark are atomics so
/// the eviction and flush paths can read them without the state lock. They
/// are only modified under the same locks that guard the slot state.
pub(crate) struct Slot {
    id: SlotId,
    address: AtomicU64,
    dirty: AtomicBool,
    flush_generation: AtomicU64,
    preflush_pending: AtomicBool,
    pub state: Mutex<SlotState>,
    data: RwLock<Box<[u8]>>,
}

impl Slot {
    /// Creates a new unbound slot.
    pub fn new(id: SlotId, block_size: usize) -> Self {
        Self {
            id,
            address: AtomicU64::new(UNBOUND),
            dirty: AtomicBool::new(false),
            flush_generation: AtomicU64::new(FlushGeneration::INITIAL.as_u64()),
            preflush_pending: AtomicBool::new(false),
            state: Mutex::new(SlotState::new()),
            data: RwLock::new(vec![0u8; block_size].into_boxed_slice()),
        }
    }

    #[inline]
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Returns the bound address, if any.
    #[inline]
    pub fn address(&self) -> Option<BlockAddress> {
        match self.address.load(Ordering::Acquire) {
            UNBOUND => None,
            raw => Some(BlockAddress::new(raw)),
        }
    }

    #[inline]
    pub fn bind(&self, address: BlockAddress) {
        debug_assert_ne!(address.as_u64(), UNBOUND, "address collides with unbound marker");
        self.address.store(address.as_u64(), Ordering::Release);
    }

    #[inline]
    pub fn unbind(&self) {
        self.address.store(UNBOUND, Ordering::Release);
        self.preflush_pending.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    #[inline]
    pub fn flush_generation(&self) -> FlushGeneration {
        FlushGeneration::new(self.flush_generation.load(Ordering::Acquire))
    }

    #[inline]
    pub fn stamp(&self, generation: FlushGeneration) {
        self.flush_generation
            .store(generation.as_u64(), Ordering::Release);
    }

    /// Marks the slot clean as of `generation`.
    #[inline]
    pub fn mark_clean(&self, generation: FlushGeneration) {
        self.set_dirty(false);
        self.stamp(generation);
        self.preflush_pending.store(false, Ordering::Release);
    }

    /// Returns true between a preflush harvest naming this slot and its
    /// next write or binding change.
    #[inline]
    pub fn is_preflush_pending(&self) -> bool {
        self.preflush_pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_preflush_pending(&self, pending: bool) {
        self.preflush_pending.store(pending, Ordering::Release);
    }

    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("address", &self.address())
            .field("dirty", &self.is_dirty())
            .field("flush_generation", &self.flush_generation())
            .finish()
    }
}
