//! Buffer pool implementation.
//!
//! The pool owns a fixed array of slots and moves their bindings between
//! block addresses. Locks, in acquisition order:
//!
//! 1. hash bucket of the address (a second bucket only via `try_lock`)
//! 2. slot state
//! 3. eviction partition
//!
//! Store I/O is always issued with none of them held.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use strata_common::constants::UNINITIALIZED_BLOCK_MARKER;
use strata_common::types::BlockAddress;
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::eviction::{InsertClass, ListKind, Partition};
use super::flush::FlushState;
use super::handle::SlotHandle;
use super::hash::{Bucket, HashIndex};
use super::preflush::PreflushHook;
use super::request::{Outcome, Priority, Purpose, ReachRequest, ReleaseMode};
use super::slot::{Hold, Payload, Slot, SlotId, SlotState};
#[cfg(feature = "alloc-tracking")]
use super::tracking::AllocationTracker;
use super::wait::WaitTicket;
use super::{BufferPoolStats, ChainStats, PartitionStats};
use crate::file::BlockStore;

/// Monotonic event counters.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub reaches: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub reads: AtomicU64,
    pub read_ahead_reads: AtomicU64,
    pub writes: AtomicU64,
    pub evictions: AtomicU64,
    pub copies: AtomicU64,
    pub waits: AtomicU64,
    pub lock_retries: AtomicU64,
    pub preflush_writes: AtomicU64,
    pub checkpoint_writes: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Rejects the address reserved as the unbound marker.
pub(crate) fn check_address(address: BlockAddress) -> BufferResult<()> {
    if address == BlockAddress::MAX {
        return Err(BufferError::InvalidAddress { address });
    }
    Ok(())
}

/// Result of negotiating with the current holders of a cached slot.
enum Grant {
    Granted,
    Replicate,
    Conflict,
}

/// Result of one victim search.
enum Eviction {
    /// Victim detached from its old binding and held exclusively.
    Claimed(SlotId),
    /// Victim is dirty and held shared; it must be written back first.
    Dirty { slot: SlotId, address: BlockAddress },
    /// The victim's bucket was busy; back off and restart.
    Contended,
}

/// Where the last holder puts a slot back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Normal,
    LastUse,
    Victim,
    Restore,
}

/// The page cache.
///
/// Gives shared or exclusive access to fixed-size blocks of a
/// [`BlockStore`], keeping recently used blocks in memory and writing
/// modified blocks back on eviction, on request, or during a checkpoint.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Backing store.
    store: Arc<dyn BlockStore>,
    /// Slot array; slots are never created or freed after construction.
    slots: Box<[Slot]>,
    /// Address to slot index.
    index: HashIndex,
    /// Eviction partitions; slot `n` belongs to partition `n % len`.
    partitions: Box<[Mutex<Partition>]>,
    /// Round-robin start for victim searches; no ordering needed.
    next_partition: AtomicUsize,
    /// Arrival numbers for wait tickets.
    wait_seq: AtomicU64,
    /// Checkpoint state.
    pub(super) flush: FlushState,
    /// Preflush callback and its throttle.
    pub(super) preflush: PreflushHook,
    /// Statistics.
    pub(super) counters: Counters,
    #[cfg(feature = "alloc-tracking")]
    tracker: Mutex<AllocationTracker>,
}

impl BufferPool {
    /// Creates a new buffer pool over `store`.
    pub fn new(config: BufferPoolConfig, store: Arc<dyn BlockStore>) -> BufferResult<Self> {
        config.validate().map_err(BufferError::config)?;
        if store.block_size() != config.block_size {
            return Err(BufferError::config(format!(
                "store block size {} does not match pool block size {}",
                store.block_size(),
                config.block_size
            )));
        }

        let num_slots = config.num_slots;
        let num_partitions = config.num_partitions;
        // validate() guarantees the slot count fits in u32.
        let slots: Box<[Slot]> = (0..num_slots as u32)
            .map(|i| Slot::new(SlotId::new(i), config.block_size))
            .collect();
        let partitions: Box<[Mutex<Partition>]> = (0..num_partitions)
            .map(|id| {
                Mutex::new(Partition::new(
                    id,
                    num_partitions,
                    num_slots,
                    config.cold_percent,
                    config.victim_percent,
                    config.preflush_threshold,
                ))
            })
            .collect();
        let index = HashIndex::new(config.bucket_count());

        info!(
            slots = num_slots,
            block_size = config.block_size,
            partitions = num_partitions,
            buckets = index.bucket_count(),
            "buffer pool created"
        );

        Ok(Self {
            config,
            store,
            slots,
            index,
            partitions,
            next_partition: AtomicUsize::new(0),
            wait_seq: AtomicU64::new(0),
            flush: FlushState::new(),
            preflush: PreflushHook::new(),
            counters: Counters::default(),
            #[cfg(feature = "alloc-tracking")]
            tracker: Mutex::new(AllocationTracker::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    /// Returns the number of slots.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Returns the block size.
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Returns true if `address` is bound to a slot.
    pub fn contains(&self, address: BlockAddress) -> bool {
        self.index.find(address).is_some()
    }

    /// Reaches a block.
    ///
    /// Returns `Ok(None)` only for opportunistic requests that miss or meet
    /// a conflicting holder, and for read-ahead that lost a race with a
    /// relocation of the same address. `Alloc` requests ignore the cache and
    /// bind the new slot to `address` when one is given.
    ///
    /// # Errors
    ///
    /// [`BufferError::NoFreeSlots`], [`BufferError::ShortRead`] and
    /// [`BufferError::ReadFailed`] are fatal. A failed write-back of a dirty
    /// victim is returned as [`BufferError::Io`].
    pub fn reach(
        &self,
        address: Option<BlockAddress>,
        request: ReachRequest,
    ) -> BufferResult<Option<SlotHandle<'_>>> {
        if let Some(address) = address {
            check_address(address)?;
        }
        if request.purpose == Purpose::Caller {
            bump(&self.counters.reaches);
        }
        match (request.access, address) {
            (super::Access::Alloc, address) => {
                let mut handle = self.reach_unbound()?;
                if let Some(address) = address {
                    handle.set_address(address)?;
                }
                Ok(Some(handle))
            }
            (_, None) => Err(BufferError::MissingAddress),
            (_, Some(address)) => self.reach_bound(address, request),
        }
    }

    /// Extends the backing store by `blocks`, returning the new block count.
    pub fn extend(&self, blocks: u64) -> BufferResult<u64> {
        Ok(self.store.extend(blocks)?)
    }

    /// Makes every completed store write durable.
    pub fn sync(&self) -> BufferResult<()> {
        Ok(self.store.sync()?)
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> BufferPoolStats {
        let mut in_use_slots = 0;
        let mut dirty_slots = 0;
        for slot in self.slots.iter() {
            if slot.state.lock().in_use > 0 {
                in_use_slots += 1;
            }
            if slot.is_dirty() {
                dirty_slots += 1;
            }
        }

        let c = &self.counters;
        BufferPoolStats {
            reaches: c.reaches.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            read_ahead_reads: c.read_ahead_reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            copies: c.copies.load(Ordering::Relaxed),
            waits: c.waits.load(Ordering::Relaxed),
            lock_retries: c.lock_retries.load(Ordering::Relaxed),
            preflush_writes: c.preflush_writes.load(Ordering::Relaxed),
            checkpoint_writes: c.checkpoint_writes.load(Ordering::Relaxed),
            in_use_slots,
            dirty_slots,
        }
    }

    /// Returns the number of dirty slots.
    pub fn dirty_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_dirty()).count()
    }

    /// Returns hash chain statistics.
    pub fn chain_stats(&self) -> ChainStats {
        self.index.chain_stats()
    }

    /// Returns per-partition list lengths.
    pub fn partition_stats(&self) -> Vec<PartitionStats> {
        self.partitions.iter().map(|p| p.lock().stats()).collect()
    }

    /// Returns the tracked bindings, one per line.
    #[cfg(feature = "alloc-tracking")]
    pub fn allocation_dump(&self) -> String {
        self.tracker.lock().dump()
    }

    // -------------------------------------------------------------------------
    // Reach
    // -------------------------------------------------------------------------

    #[inline]
    pub(super) fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id.index()]
    }

    #[inline]
    pub(super) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[inline]
    pub(super) fn partitions(&self) -> &[Mutex<Partition>] {
        &self.partitions
    }

    #[inline]
    pub(super) fn index(&self) -> &HashIndex {
        &self.index
    }

    /// Locks the bucket of `address`.
    #[inline]
    pub(super) fn index_lock(&self, address: BlockAddress) -> MutexGuard<'_, Bucket> {
        self.index.lock(self.index.bucket_of(address))
    }

    #[inline]
    fn partition_of(&self, id: SlotId) -> MutexGuard<'_, Partition> {
        self.partitions[id.index() % self.partitions.len()].lock()
    }

    fn reach_unbound(&self) -> BufferResult<SlotHandle<'_>> {
        let id = self.claim_unbound()?;
        self.fill_uninitialized(id);
        trace!(slot = %id, "reached unbound slot");
        Ok(SlotHandle::new(self, id, Hold::Exclusive, Purpose::Caller))
    }

    pub(super) fn reach_bound(
        &self,
        address: BlockAddress,
        request: ReachRequest,
    ) -> BufferResult<Option<SlotHandle<'_>>> {
        let bucket_idx = self.index.bucket_of(address);
        let mut backoff = Backoff::new(&self.config);
        let mut from_queue = false;
        let mut seq = None;
        let mut spare: Option<SlotId> = None;

        let outcome = loop {
            let mut bucket = self.index.lock(bucket_idx);

            if let Some(id) = bucket.find(address) {
                let slot = self.slot(id);
                let mut state = slot.state.lock();
                match self.try_grant(id, &mut state, &request, from_queue) {
                    Grant::Granted => {
                        if request.purpose != Purpose::Caller && state.hold == Hold::Shared {
                            state.flush_holds += 1;
                        }
                        if request.purpose == Purpose::Caller {
                            bump(&self.counters.hits);
                            if !request.read_ahead {
                                state.read_ahead = false;
                            }
                        }
                        trace!(address = %address, slot = %id, access = %request.access, "reach hit");
                        break Ok(Some(SlotHandle::new(self, id, state.hold, request.purpose)));
                    }
                    Grant::Replicate => match spare.take() {
                        Some(copy) => {
                            self.replicate(&mut bucket, address, id, &mut state, copy);
                            bump(&self.counters.hits);
                            bump(&self.counters.copies);
                            break Ok(Some(SlotHandle::new(self, copy, Hold::Exclusive, request.purpose)));
                        }
                        None => {
                            drop(state);
                            drop(bucket);
                            spare = Some(self.claim_unbound()?);
                            continue;
                        }
                    },
                    Grant::Conflict => {
                        if !request.waits_on_conflict() {
                            break Ok(None);
                        }
                        let seq = *seq.get_or_insert_with(|| self.wait_seq.fetch_add(1, Ordering::Relaxed));
                        let ticket = WaitTicket::new(seq, request.access.is_shared());
                        state.waiters.enqueue(Arc::clone(&ticket));
                        drop(state);
                        drop(bucket);

                        bump(&self.counters.waits);
                        trace!(address = %address, slot = %id, access = %request.access, "reach waiting");
                        ticket.wait();
                        from_queue = true;
                        continue;
                    }
                }
            }

            if !request.loads_on_miss() {
                break Ok(None);
            }

            let id = match spare.take() {
                Some(id) => id,
                None => match self.evict(Some((bucket_idx, &mut bucket)))? {
                    Eviction::Claimed(id) => id,
                    Eviction::Dirty { slot, address: victim } => {
                        drop(bucket);
                        self.write_back_victim(slot, victim)?;
                        continue;
                    }
                    Eviction::Contended => {
                        drop(bucket);
                        bump(&self.counters.lock_retries);
                        backoff.snooze();
                        continue;
                    }
                },
            };

            match self.install(bucket, address, id, &request)? {
                Some(handle) => break Ok(Some(handle)),
                // Relocation onto the address won the race with the load.
                None if request.read_ahead => break Ok(None),
                None => continue,
            }
        };

        if let Some(id) = spare {
            self.put_back(id, Outcome::Discard, Placement::Victim);
        }
        outcome
    }

    /// Negotiates access to a cached slot with its current holders.
    fn try_grant(&self, id: SlotId, state: &mut SlotState, request: &ReachRequest, from_queue: bool) -> Grant {
        let shared = request.access.is_shared();
        // Fresh requests queue behind parked ones; woken ones go first.
        let queue_blocks = !from_queue && !state.waiters.is_empty();

        match state.hold {
            Hold::Idle => {
                if queue_blocks {
                    return Grant::Conflict;
                }
                debug_assert_eq!(state.in_use, 0);
                state.prior_list = self.partition_of(id).remove(id);
                state.in_use = 1;
                if shared {
                    state.hold = Hold::Shared;
                } else {
                    state.hold = Hold::Exclusive;
                    state.payload = None;
                }
                Grant::Granted
            }
            Hold::Shared if shared => {
                if queue_blocks {
                    return Grant::Conflict;
                }
                state.in_use += 1;
                Grant::Granted
            }
            Hold::Shared if request.access.allows_copy() && state.flush_holds == 0 => Grant::Replicate,
            Hold::Shared | Hold::Exclusive | Hold::Loading => Grant::Conflict,
        }
    }

    /// Hands the address over to a private copy of a shared slot.
    ///
    /// The readers keep the old slot, now stale, until they release it.
    fn replicate(
        &self,
        bucket: &mut Bucket,
        address: BlockAddress,
        source_id: SlotId,
        source_state: &mut SlotState,
        copy_id: SlotId,
    ) {
        let source = self.slot(source_id);
        let copy = self.slot(copy_id);
        copy.write_data().copy_from_slice(&source.read_data());
        copy.set_dirty(source.is_dirty());
        copy.stamp(source.flush_generation());
        copy.bind(address);
        copy.state.lock().reset_binding();
        bucket.replace(address, copy_id);

        source.set_dirty(false);
        source_state.superseded_by = Some(copy_id);
        source_state.waiters.wake_all();
        debug!(address = %address, from = %source_id, to = %copy_id, "replicated slot for writer");
    }

    /// Binds a claimed slot to `address` and fills it if the access needs
    /// the old content.
    fn install<'a>(
        &'a self,
        mut bucket: MutexGuard<'_, Bucket>,
        address: BlockAddress,
        id: SlotId,
        request: &ReachRequest,
    ) -> BufferResult<Option<SlotHandle<'a>>> {
        let slot = self.slot(id);
        let needs_read = request.access.needs_read();

        slot.set_dirty(false);
        slot.stamp(self.flush.generation());
        slot.bind(address);
        bucket.insert(address, id);
        {
            let mut state = slot.state.lock();
            state.reset_binding();
            state.in_use = 1;
            state.hold = if needs_read { Hold::Loading } else { Hold::Exclusive };
            state.read_ahead = request.read_ahead;
        }
        drop(bucket);

        if request.purpose == Purpose::Caller {
            bump(&self.counters.misses);
        }
        if !needs_read {
            self.fill_uninitialized(id);
            trace!(address = %address, slot = %id, access = %request.access, "reach miss, no read");
            return Ok(Some(SlotHandle::new(self, id, Hold::Exclusive, request.purpose)));
        }
        self.load(id, address, request)
    }

    fn load<'a>(
        &'a self,
        id: SlotId,
        address: BlockAddress,
        request: &ReachRequest,
    ) -> BufferResult<Option<SlotHandle<'a>>> {
        let slot = self.slot(id);
        let block_size = self.config.block_size;
        let read = self.store.read_block(address, &mut slot.write_data());

        let failure = match read {
            Ok(n) if n == block_size => None,
            Ok(actual) => Some(BufferError::ShortRead {
                address,
                expected: block_size,
                actual,
            }),
            Err(source) => Some(BufferError::ReadFailed { address, source }),
        };
        if let Some(err) = failure {
            error!(address = %address, slot = %id, error = %err, "block read failed");
            self.put_back(id, Outcome::Discard, Placement::Victim);
            return Err(err);
        }

        bump(&self.counters.reads);
        if request.read_ahead {
            bump(&self.counters.read_ahead_reads);
        }

        let bucket = self.index.lock(self.index.bucket_of(address));
        let mut state = slot.state.lock();
        if state.is_stale() {
            drop(state);
            drop(bucket);
            debug!(address = %address, slot = %id, "block relocated during load, dropping read");
            self.put_back(id, Outcome::Discard, Placement::Victim);
            return Ok(None);
        }

        let shared = request.access.is_shared();
        if shared {
            state.hold = Hold::Shared;
            state.waiters.wake_shared();
        } else {
            state.hold = Hold::Exclusive;
        }
        trace!(address = %address, slot = %id, access = %request.access, "reach miss, loaded");
        Ok(Some(SlotHandle::new(self, id, state.hold, request.purpose)))
    }

    fn fill_uninitialized(&self, id: SlotId) {
        if cfg!(debug_assertions) {
            self.slot(id).write_data().fill(UNINITIALIZED_BLOCK_MARKER);
        }
    }

    // -------------------------------------------------------------------------
    // Eviction
    // -------------------------------------------------------------------------

    /// Evicts a slot and returns it unbound, held exclusively by the caller.
    pub(super) fn claim_unbound(&self) -> BufferResult<SlotId> {
        let mut backoff = Backoff::new(&self.config);
        loop {
            match self.evict(None)? {
                Eviction::Claimed(id) => return Ok(id),
                Eviction::Dirty { slot, address } => self.write_back_victim(slot, address)?,
                Eviction::Contended => {
                    bump(&self.counters.lock_retries);
                    backoff.snooze();
                }
            }
        }
    }

    /// Finds a victim, preferring clean slots in every partition before
    /// settling for a dirty one.
    ///
    /// `held` is the bucket the caller already owns; any other bucket is
    /// only try-locked.
    fn evict(&self, mut held: Option<(usize, &mut Bucket)>) -> BufferResult<Eviction> {
        let count = self.partitions.len();
        let start = self.next_partition.fetch_add(1, Ordering::Relaxed) % count;

        for must_be_clean in [true, false] {
            for offset in 0..count {
                let mut partition = self.partitions[(start + offset) % count].lock();
                let Some((id, kind)) = partition.find_victim(must_be_clean, &self.slots) else {
                    continue;
                };

                let Some(old) = self.slot(id).address() else {
                    drop(partition);
                    let mut state = self.slot(id).state.lock();
                    state.reset_binding();
                    state.in_use = 1;
                    state.hold = Hold::Exclusive;
                    return Ok(Eviction::Claimed(id));
                };

                let old_idx = self.index.bucket_of(old);
                if let Some((held_idx, bucket)) = held.as_mut() {
                    if *held_idx == old_idx {
                        drop(partition);
                        return Ok(self.detach_victim(id, old, kind, bucket));
                    }
                }
                let Some(mut bucket) = self.index.try_lock(old_idx) else {
                    partition.return_victim(id, kind);
                    trace!(slot = %id, address = %old, "victim bucket busy");
                    return Ok(Eviction::Contended);
                };
                drop(partition);
                return Ok(self.detach_victim(id, old, kind, &mut bucket));
            }
        }

        self.report_exhaustion();
        Err(BufferError::NoFreeSlots {
            num_slots: self.slots.len(),
        })
    }

    /// Takes a popped victim out of its binding, or claims it for write-back
    /// when dirty.
    fn detach_victim(&self, id: SlotId, old: BlockAddress, kind: ListKind, bucket: &mut Bucket) -> Eviction {
        let slot = self.slot(id);
        let mut state = slot.state.lock();
        debug_assert_eq!(state.in_use, 0, "victim {id} has holders");

        if slot.is_dirty() {
            // Readers of the address may still join while it is written.
            state.in_use = 1;
            state.flush_holds = 1;
            state.hold = Hold::Shared;
            state.prior_list = Some(kind);
            return Eviction::Dirty { slot: id, address: old };
        }

        bucket.remove_slot(old, id);
        state.waiters.wake_all();
        state.reset_binding();
        state.in_use = 1;
        state.hold = Hold::Exclusive;
        slot.unbind();
        bump(&self.counters.evictions);
        debug!(slot = %id, address = %old, "evicted clean slot");
        Eviction::Claimed(id)
    }

    /// Writes a dirty victim claimed by [`Self::detach_victim`] and puts it
    /// back as a clean victim.
    fn write_back_victim(&self, id: SlotId, address: BlockAddress) -> BufferResult<()> {
        let slot = self.slot(id);
        let result = self.store.write_block(address, &slot.read_data());
        match result {
            Ok(()) => {
                bump(&self.counters.writes);
                slot.mark_clean(self.flush.generation());
                self.redirty_successor(id, address);
                debug!(slot = %id, address = %address, "wrote back dirty victim");
                self.unpin(id);
                self.put_back(id, Outcome::Clean, Placement::Victim);
                Ok(())
            }
            Err(err) => {
                warn!(slot = %id, address = %address, error = %err, "write-back of dirty victim failed");
                self.unpin(id);
                self.put_back(id, Outcome::Clean, Placement::Restore);
                Err(err.into())
            }
        }
    }

    /// A relocation onto `address` during a write of `id` bound a newer
    /// block there; what was just written is older.
    fn redirty_successor(&self, id: SlotId, address: BlockAddress) {
        let bucket = self.index.lock(self.index.bucket_of(address));
        if let Some(current) = bucket.find(address).filter(|current| *current != id) {
            self.slot(current).set_dirty(true);
        }
    }

    fn report_exhaustion(&self) {
        let stats = self.stats();
        error!(
            slots = self.slots.len(),
            in_use = stats.in_use_slots,
            dirty = stats.dirty_slots,
            reaches = stats.reaches,
            "buffer pool exhausted: every slot is held"
        );
        for p in self.partition_stats() {
            error!(
                partition = p.partition,
                hot = p.hot,
                cold = p.cold,
                next_flush = p.next_flush,
                current_flush = p.current_flush,
                clean_victims = p.clean_victims,
                "partition lists"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Release
    // -------------------------------------------------------------------------

    /// Gives back one hold on a slot.
    pub(super) fn release_slot(&self, id: SlotId, hold: Hold, mode: ReleaseMode, purpose: Purpose) -> BufferResult<()> {
        if matches!(mode.outcome, Outcome::Dirty | Outcome::Flush) {
            assert_eq!(hold, Hold::Exclusive, "slot {id} released {:?} from a shared hold", mode.outcome);
        }
        let result = if mode.outcome == Outcome::Flush {
            self.write_held(id)
        } else {
            Ok(())
        };
        if purpose != Purpose::Caller && hold == Hold::Shared {
            self.unpin(id);
        }

        let placement = match (purpose, mode.priority) {
            (Purpose::Checkpoint, _) | (Purpose::Preflush, Priority::Normal) => Placement::Restore,
            (_, Priority::Preflush) => Placement::Victim,
            (_, Priority::LastUse) => Placement::LastUse,
            (_, Priority::Normal) => Placement::Normal,
        };
        self.put_back(id, mode.outcome, placement);
        result
    }

    /// Drops a hold taken to write the slot out. Copy-on-write writers parked
    /// behind it may replicate again once no such hold is left.
    fn unpin(&self, id: SlotId) {
        let slot = self.slot(id);
        let _bucket = slot.address().map(|a| self.index.lock(self.index.bucket_of(a)));
        let mut state = slot.state.lock();
        assert!(state.flush_holds > 0, "slot {id} has no flush hold");
        state.flush_holds -= 1;
        if state.flush_holds == 0 && state.in_use > 1 {
            state.waiters.wake_all();
        }
    }

    /// Writes an exclusively held slot now.
    fn write_held(&self, id: SlotId) -> BufferResult<()> {
        let slot = self.slot(id);
        let Some(address) = slot.address() else {
            return Err(BufferError::NotBound { slot: id.as_u32() });
        };
        let result = self.store.write_block(address, &slot.read_data());
        match result {
            Ok(()) => {
                bump(&self.counters.writes);
                slot.mark_clean(self.flush.generation());
                self.redirty_successor(id, address);
                trace!(slot = %id, address = %address, "flushed on release");
                Ok(())
            }
            Err(err) => {
                slot.set_dirty(true);
                warn!(slot = %id, address = %address, error = %err, "flush on release failed");
                Err(err.into())
            }
        }
    }

    /// Drops one holder and, for the last one, returns the slot to its
    /// partition or frees it.
    fn put_back(&self, id: SlotId, outcome: Outcome, placement: Placement) {
        let slot = self.slot(id);
        let address = slot.address();
        let mut bucket = address.map(|a| self.index.lock(self.index.bucket_of(a)));
        let mut state = slot.state.lock();

        assert!(state.in_use > 0, "slot {id} released with no holders");
        if outcome == Outcome::Dirty {
            slot.set_dirty(true);
        }
        let discard = outcome == Outcome::Discard && state.in_use == 1;
        state.in_use -= 1;
        if state.in_use > 0 {
            return;
        }

        let fire = if state.is_stale() || discard || address.is_none() {
            if let (Some(address), Some(bucket)) = (address, bucket.as_mut()) {
                if bucket.remove_slot(address, id) && discard {
                    self.forget_binding(address);
                }
            }
            if address.is_none() && slot.is_dirty() {
                warn!(slot = %id, "unbound slot released dirty, content dropped");
            }
            slot.set_dirty(false);
            slot.unbind();
            state.reset_binding();
            state.hold = Hold::Idle;
            state.waiters.wake_all();
            self.partition_of(id).insert(id, InsertClass::Victim, &self.slots)
        } else {
            let class = match placement {
                Placement::Restore => InsertClass::Restore(state.prior_list),
                Placement::Victim => InsertClass::Victim,
                Placement::LastUse => InsertClass::LastUse,
                Placement::Normal if state.read_ahead => InsertClass::Cold,
                Placement::Normal => InsertClass::Hot,
            };
            state.hold = Hold::Idle;
            state.read_ahead = false;
            state.prior_list = None;
            let fire = self.partition_of(id).insert(id, class, &self.slots);
            state.waiters.wake_next();
            fire
        };

        drop(state);
        drop(bucket);
        if fire {
            self.preflush.fire();
        }
    }

    // -------------------------------------------------------------------------
    // Binding changes
    // -------------------------------------------------------------------------

    /// Moves an exclusively held slot to `new`, displacing any occupant.
    pub(super) fn rebind(&self, id: SlotId, new: BlockAddress) {
        let slot = self.slot(id);
        let new_idx = self.index.bucket_of(new);
        let mut backoff = Backoff::new(&self.config);

        loop {
            let old = slot.address();
            if old == Some(new) {
                slot.set_dirty(true);
                return;
            }
            match old.map(|a| (a, self.index.bucket_of(a))) {
                None => {
                    let mut bucket = self.index.lock(new_idx);
                    self.move_binding(id, None, None, new, &mut bucket);
                    return;
                }
                Some((old, old_idx)) if old_idx == new_idx => {
                    let mut bucket = self.index.lock(new_idx);
                    self.move_binding(id, Some(old), None, new, &mut bucket);
                    return;
                }
                Some((old, old_idx)) => {
                    let mut old_bucket = self.index.lock(old_idx);
                    if let Some(mut new_bucket) = self.index.try_lock(new_idx) {
                        self.move_binding(id, Some(old), Some(&mut old_bucket), new, &mut new_bucket);
                        return;
                    }
                }
            }
            bump(&self.counters.lock_retries);
            backoff.snooze();
        }
    }

    fn move_binding(
        &self,
        id: SlotId,
        old: Option<BlockAddress>,
        old_bucket: Option<&mut Bucket>,
        new: BlockAddress,
        new_bucket: &mut Bucket,
    ) {
        let slot = self.slot(id);
        let mut state = slot.state.lock();

        if let Some(old) = old {
            match old_bucket {
                Some(bucket) => bucket.remove_slot(old, id),
                None => new_bucket.remove_slot(old, id),
            };
            self.forget_binding(old);
        }
        if let Some(occupant) = new_bucket.remove(new) {
            self.displace(occupant, id, new);
        }
        new_bucket.insert(new, id);
        slot.bind(new);
        slot.set_dirty(true);
        state.reset_binding();
        state.waiters.wake_all();
        self.record_binding(new, id);
        debug!(slot = %id, from = ?old, to = %new, "slot rebound");
    }

    /// Removes a slot whose address was taken over by `by`.
    ///
    /// An idle occupant is freed without being written; a held one turns
    /// stale and is freed by its last holder.
    fn displace(&self, occupant: SlotId, by: SlotId, address: BlockAddress) {
        let slot = self.slot(occupant);
        let mut state = slot.state.lock();
        slot.set_dirty(false);
        state.waiters.wake_all();

        if state.in_use == 0 {
            // Off the lists before unbinding: an evictor must never pop a
            // slot that reads as unbound while it is being re-inserted.
            let mut partition = self.partition_of(occupant);
            partition.remove(occupant);
            slot.unbind();
            state.reset_binding();
            partition.insert(occupant, InsertClass::Victim, &self.slots);
            debug!(slot = %occupant, address = %address, "idle occupant dropped by relocation");
        } else {
            state.superseded_by = Some(by);
            debug!(slot = %occupant, address = %address, "held occupant made stale by relocation");
        }
    }

    /// Claims an unbound slot holding a copy of `source`.
    pub(super) fn copy_to_unbound(&self, source: SlotId) -> BufferResult<SlotId> {
        let copy = self.claim_unbound()?;
        self.slot(copy)
            .write_data()
            .copy_from_slice(&self.slot(source).read_data());
        Ok(copy)
    }

    pub(super) fn attach_payload(&self, id: SlotId, payload: Payload) -> bool {
        let mut state = self.slot(id).state.lock();
        if state.payload.is_some() {
            return false;
        }
        state.payload = Some(payload);
        true
    }

    pub(super) fn payload(&self, id: SlotId) -> Option<Payload> {
        self.slot(id).state.lock().payload.clone()
    }

    pub(super) fn is_stale(&self, id: SlotId) -> bool {
        self.slot(id).state.lock().is_stale()
    }

    #[cfg(feature = "alloc-tracking")]
    fn record_binding(&self, address: BlockAddress, id: SlotId) {
        self.tracker.lock().record(address, id);
    }

    #[cfg(not(feature = "alloc-tracking"))]
    #[inline]
    fn record_binding(&self, _address: BlockAddress, _id: SlotId) {}

    #[cfg(feature = "alloc-tracking")]
    fn forget_binding(&self, address: BlockAddress) {
        self.tracker.lock().forget(address);
    }

    #[cfg(not(feature = "alloc-tracking"))]
    #[inline]
    fn forget_binding(&self, _address: BlockAddress) {}
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("num_slots", &self.slots.len())
            .field("block_size", &self.config.block_size)
            .field("partitions", &self.partitions.len())
            .field("index", &self.index)
            .finish()
    }
}
