//! Page cache for Strata.
//!
//! The buffer pool keeps a fixed set of block-sized slots and binds them to
//! block addresses of a [`BlockStore`](crate::file::BlockStore) on demand:
//!
//! - **Reach/Release**: shared or exclusive holds, with optional
//!   copy-on-write for writers meeting readers
//! - **Hash Index**: per-bucket locks; a second bucket is only try-locked
//! - **Eviction**: K priority-LRU partitions with hot, cold and victim lists
//! - **Wait Queues**: arrival-ordered, readers batched, writers one at a time
//! - **Checkpoints**: generation-based flush rounds
//! - **Preflush**: background write-back of dirty victims
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            BufferPool                             │
//! │  ┌─────────────────────────────────────────────────────────────┐  │
//! │  │           HashIndex: Mutex<Bucket> × N (addr % N)           │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! │                                │                                  │
//! │                                ▼                                  │
//! │  ┌─────────────────────────────────────────────────────────────┐  │
//! │  │                         Slot Array                          │  │
//! │  │  ┌─────────┐ ┌─────────┐ ┌─────────┐        ┌─────────┐     │  │
//! │  │  │ Slot 0  │ │ Slot 1  │ │ Slot 2  │  ...   │ Slot N  │     │  │
//! │  │  │ address │ │ address │ │ address │        │ address │     │  │
//! │  │  │ dirty   │ │ dirty   │ │ dirty   │        │ dirty   │     │  │
//! │  │  │ state   │ │ state   │ │ state   │        │ state   │     │  │
//! │  │  │ data[]  │ │ data[]  │ │ data[]  │        │ data[]  │     │  │
//! │  │  └─────────┘ └─────────┘ └─────────┘        └─────────┘     │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! │                                │                                  │
//! │                                ▼                                  │
//! │  ┌─────────────────────────────────────────────────────────────┐  │
//! │  │     Partition × K (slot % K): hot │ cold │ victim area      │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use strata_common::types::BlockAddress;
//! use strata_storage::buffer::{BufferPool, BufferPoolConfig, ReachRequest, ReleaseMode};
//! use strata_storage::file::MemoryBlockStore;
//!
//! let store = Arc::new(MemoryBlockStore::new(512, 64));
//! let pool = BufferPool::new(BufferPoolConfig::new(16).with_block_size(512), store)?;
//!
//! // Write a block without reading it first.
//! let mut handle = pool
//!     .reach(Some(BlockAddress::new(7)), ReachRequest::write())?
//!     .expect("blocking reach always returns a slot");
//! handle.data_mut()[..5].copy_from_slice(b"hello");
//! handle.release(ReleaseMode::dirty())?;
//!
//! // Read it back from the cache.
//! let handle = pool
//!     .reach(Some(BlockAddress::new(7)), ReachRequest::read())?
//!     .expect("blocking reach always returns a slot");
//! assert_eq!(&handle.data()[..5], b"hello");
//! handle.release(ReleaseMode::clean())?;
//!
//! // Make it durable.
//! pool.checkpoint(16)?;
//! # Ok::<(), strata_storage::buffer::BufferError>(())
//! ```

mod backoff;
mod config;
mod error;
mod eviction;
mod flush;
mod handle;
mod hash;
mod pool;
mod preflush;
mod request;
mod slot;
#[cfg(feature = "alloc-tracking")]
mod tracking;
mod wait;

pub use config::BufferPoolConfig;
pub use error::{BufferError, BufferResult};
pub use handle::SlotHandle;
pub use pool::BufferPool;
pub use preflush::{PreflushCallback, PreflushWriter};
pub use request::{Access, MissPolicy, Outcome, Priority, ReachRequest, ReleaseMode};
pub use slot::{Payload, SlotId};
#[cfg(feature = "alloc-tracking")]
pub use tracking::AllocationTracker;

/// Statistics for buffer pool monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Caller reaches (checkpoint and preflush reaches excluded).
    pub reaches: u64,
    /// Reaches served by a cached slot.
    pub hits: u64,
    /// Reaches that bound a new slot.
    pub misses: u64,
    /// Blocks read from the store.
    pub reads: u64,
    /// Of which issued by read-ahead.
    pub read_ahead_reads: u64,
    /// Blocks written to the store, for any reason.
    pub writes: u64,
    /// Clean slots unbound to make room.
    pub evictions: u64,
    /// Copy-on-write replications.
    pub copies: u64,
    /// Reaches that parked on a wait queue.
    pub waits: u64,
    /// Restarts after a failed second-bucket lock.
    pub lock_retries: u64,
    /// Writes issued by preflush.
    pub preflush_writes: u64,
    /// Writes issued by checkpoints.
    pub checkpoint_writes: u64,
    /// Slots with at least one holder.
    pub in_use_slots: usize,
    /// Slots with unwritten changes.
    pub dirty_slots: usize,
}

impl BufferPoolStats {
    /// Returns the cache hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.misses;
        if served == 0 {
            0.0
        } else {
            self.hits as f64 / served as f64
        }
    }
}

/// Hash chain statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    /// Number of buckets.
    pub buckets: usize,
    /// Buckets holding at least one entry.
    pub non_empty: usize,
    /// Bound addresses across all buckets.
    pub entries: usize,
    /// Longest chain.
    pub max_chain: usize,
}

impl ChainStats {
    /// Returns the mean length of the non-empty chains.
    pub fn mean_chain(&self) -> f64 {
        if self.non_empty == 0 {
            0.0
        } else {
            self.entries as f64 / self.non_empty as f64
        }
    }
}

/// List lengths of one eviction partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Partition index.
    pub partition: usize,
    /// Slots the partition owns, held or not.
    pub owned: usize,
    /// Recently used slots.
    pub hot: usize,
    /// Slots aging toward the victim area.
    pub cold: usize,
    /// Dirty victims not yet claimed by preflush.
    pub next_flush: usize,
    /// Dirty victims claimed by preflush.
    pub current_flush: usize,
    /// Clean victims, reused first.
    pub clean_victims: usize,
}

impl PartitionStats {
    /// Returns the number of idle slots in the partition.
    pub fn idle(&self) -> usize {
        self.hot + self.cold + self.next_flush + self.current_flush + self.clean_victims
    }
}
