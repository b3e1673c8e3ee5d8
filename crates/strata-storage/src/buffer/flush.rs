//! Checkpoint flush.
//!
//! A checkpoint opens a new flush generation `G` and collects every block
//! that was dirty at that moment with a generation below `G`. Steps then
//! write the collected blocks a few at a time; when none remain every change
//! made before the round started is on stable storage.
//!
//! Slots dirtied after the scan are stamped with `G` when they are next
//! written, so they belong to the following round.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use strata_common::types::{BlockAddress, FlushGeneration};
use tracing::{debug, info, warn};

use super::error::BufferResult;
use super::pool::{bump, BufferPool};
use super::request::{ReachRequest, ReleaseMode};

/// Generation counter plus the addresses left in the current round.
#[derive(Debug)]
pub(crate) struct FlushState {
    generation: AtomicU64,
    round: Mutex<FlushRound>,
}

#[derive(Debug)]
struct FlushRound {
    generation: FlushGeneration,
    pending: BTreeSet<BlockAddress>,
}

impl FlushState {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(FlushGeneration::INITIAL.as_u64()),
            round: Mutex::new(FlushRound {
                generation: FlushGeneration::INITIAL,
                pending: BTreeSet::new(),
            }),
        }
    }

    /// Returns the current flush generation.
    #[inline]
    pub fn generation(&self) -> FlushGeneration {
        FlushGeneration::new(self.generation.load(Ordering::Acquire))
    }

    fn advance(&self) -> FlushGeneration {
        FlushGeneration::new(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

impl BufferPool {
    /// Returns the current flush generation.
    pub fn current_generation(&self) -> FlushGeneration {
        self.flush.generation()
    }

    /// Starts a checkpoint round and returns its generation.
    ///
    /// Blocks dirty at this moment are collected for [`Self::flush_step`];
    /// clean blocks are stamped with the new generation. Calling this again
    /// before the round finished starts over with a fresh collection.
    pub fn flush_init(&self) -> FlushGeneration {
        let mut round = self.flush.round.lock();
        let generation = self.flush.advance();

        // Bindings and replication only change under the bucket lock, so
        // each bucket is seen in one consistent state.
        let index = self.index();
        let mut pending = BTreeSet::new();
        for idx in 0..index.bucket_count() {
            let bucket = index.lock(idx);
            for (address, id) in bucket.iter() {
                let slot = self.slot(id);
                if slot.is_dirty() {
                    if slot.flush_generation() < generation {
                        pending.insert(address);
                    }
                } else {
                    slot.stamp(generation);
                }
            }
        }

        info!(generation = %generation, pending = pending.len(), "checkpoint started");
        round.generation = generation;
        round.pending = pending;
        generation
    }

    /// Writes up to `max` collected blocks.
    ///
    /// Returns `Ok(true)` while blocks remain and `Ok(false)` once the round
    /// is complete and the store has been synced.
    ///
    /// # Errors
    ///
    /// A failed write leaves the block collected and is returned; the step
    /// can be retried.
    pub fn flush_step(&self, max: usize) -> BufferResult<bool> {
        let mut round = self.flush.round.lock();
        let generation = round.generation;

        for _ in 0..max {
            let Some(address) = round.pending.pop_first() else {
                break;
            };
            if let Err(err) = self.checkpoint_block(address, generation) {
                warn!(address = %address, error = %err, "checkpoint write failed");
                round.pending.insert(address);
                return Err(err);
            }
        }

        if !round.pending.is_empty() {
            debug!(generation = %generation, remaining = round.pending.len(), "checkpoint step");
            return Ok(true);
        }
        self.sync()?;
        info!(generation = %generation, "checkpoint complete");
        Ok(false)
    }

    /// Runs a whole checkpoint round.
    pub fn checkpoint(&self, step: usize) -> BufferResult<FlushGeneration> {
        let generation = self.flush_init();
        while self.flush_step(step.max(1))? {}
        Ok(generation)
    }

    /// Returns the number of blocks left in the current round.
    pub fn flush_pending(&self) -> usize {
        self.flush.round.lock().pending.len()
    }

    fn checkpoint_block(&self, address: BlockAddress, generation: FlushGeneration) -> BufferResult<()> {
        // Evicted since the scan: the eviction wrote it. The hold keeps
        // copy-on-write writers from moving the content away while it is
        // checked and written.
        let Some(handle) = self.reach_bound(address, ReachRequest::checkpoint())? else {
            return Ok(());
        };
        let slot = self.slot(handle.slot_id());
        if slot.is_dirty() && slot.flush_generation() < generation {
            let written = self.store().write_block(address, &handle.data());
            if let Err(err) = written {
                handle.release(ReleaseMode::clean())?;
                return Err(err.into());
            }
            slot.mark_clean(generation);
            bump(&self.counters.writes);
            bump(&self.counters.checkpoint_writes);
        }
        handle.release(ReleaseMode::clean())
    }
}
