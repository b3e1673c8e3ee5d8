//! Preflush: background write-back of dirty victims.
//!
//! When a partition's next-flush batch grows past the configured threshold,
//! the release that grew it fires the preflush callback (once, until the next
//! harvest re-arms it). The callback is expected to get a writer to call
//! [`BufferPool::get_preflush_batch`] and [`BufferPool::preflush`], so that a
//! later miss finds clean victims instead of writing one synchronously.
//! [`PreflushWriter`] is such a writer on a dedicated thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use strata_common::types::BlockAddress;
use tracing::{debug, info, trace, warn};

use super::error::{BufferError, BufferResult};
use super::pool::{bump, BufferPool};
use super::request::{ReachRequest, ReleaseMode};
use crate::file::IoError;

/// Callback fired when preflush work is available.
///
/// It runs on the releasing thread after all pool locks are dropped; it must
/// not block on the pool.
pub type PreflushCallback = Arc<dyn Fn() + Send + Sync>;

/// Installed callback plus its one-shot arming.
pub(crate) struct PreflushHook {
    callback: RwLock<Option<PreflushCallback>>,
    armed: AtomicBool,
}

impl PreflushHook {
    pub fn new() -> Self {
        Self {
            callback: RwLock::new(None),
            armed: AtomicBool::new(true),
        }
    }

    fn set(&self, callback: Option<PreflushCallback>) {
        *self.callback.write() = callback;
        self.rearm();
    }

    fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Runs the callback if armed, disarming it.
    pub fn fire(&self) {
        if !self.armed.swap(false, Ordering::AcqRel) {
            return;
        }
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => {
                trace!("preflush callback fired");
                callback();
            }
            None => self.rearm(),
        }
    }
}

impl BufferPool {
    /// Installs (or with `None` removes) the preflush callback.
    pub fn set_preflush_callback(&self, callback: Option<PreflushCallback>) {
        self.preflush.set(callback);
    }

    /// Claims the oldest dirty victims of every partition for writing.
    ///
    /// Returns their addresses sorted and re-arms the callback.
    pub fn get_preflush_batch(&self) -> Vec<BlockAddress> {
        let batch = self.config().preflush_batch;
        let mut addresses = Vec::new();
        for partition in self.partitions() {
            let mut partition = partition.lock();
            for id in partition.harvest(batch, self.slots()) {
                // Idle slots only change binding after leaving the partition.
                if let Some(address) = self.slot(id).address() {
                    addresses.push(address);
                }
            }
        }
        self.preflush.rearm();
        addresses.sort_unstable();
        addresses.dedup();
        trace!(count = addresses.len(), "preflush batch harvested");
        addresses
    }

    /// Writes the given blocks if they are still cached, idle, dirty and
    /// claimed by a harvest.
    ///
    /// Blocks that are held are skipped, as are blocks written or rebound
    /// since they were harvested. Written slots go back to the clean victims.
    /// Returns the number of blocks written.
    pub fn preflush(&self, addresses: &[BlockAddress]) -> BufferResult<usize> {
        let mut written = 0;
        for &address in addresses {
            let Some(handle) = self.reach(Some(address), ReachRequest::preflush())? else {
                continue;
            };
            let slot = self.slot(handle.slot_id());
            if !slot.is_dirty() || !slot.is_preflush_pending() {
                trace!(address = %address, "preflush skipped, no longer pending");
                slot.set_preflush_pending(false);
                handle.release(ReleaseMode::clean())?;
                continue;
            }

            let result = self.store().write_block(address, &handle.data());
            if let Err(err) = result {
                warn!(address = %address, error = %err, "preflush write failed");
                handle.release(ReleaseMode::preflush())?;
                return Err(err.into());
            }
            slot.mark_clean(self.current_generation());
            bump(&self.counters.writes);
            bump(&self.counters.preflush_writes);
            written += 1;
            handle.release(ReleaseMode::preflush())?;
        }
        Ok(written)
    }
}

#[derive(Debug, Default)]
struct WriterState {
    requested: bool,
    shutdown: bool,
    rounds: u64,
}

#[derive(Debug, Default)]
struct WriterShared {
    state: Mutex<WriterState>,
    /// Signals the writer thread.
    wake: Condvar,
    /// Signals round completion.
    done: Condvar,
}

impl WriterShared {
    fn request(&self) {
        let mut state = self.state.lock();
        state.requested = true;
        self.wake.notify_one();
    }
}

/// Background preflush writer.
///
/// Installs itself as the pool's preflush callback and writes harvested
/// batches on its own thread until shut down or dropped.
pub struct PreflushWriter {
    pool: Arc<BufferPool>,
    shared: Arc<WriterShared>,
    thread: Option<JoinHandle<()>>,
}

impl PreflushWriter {
    /// Starts the writer thread.
    pub fn start(pool: Arc<BufferPool>) -> BufferResult<Self> {
        let shared = Arc::new(WriterShared::default());
        let thread = thread::Builder::new()
            .name("strata-preflush".into())
            .spawn({
                let pool = Arc::clone(&pool);
                let shared = Arc::clone(&shared);
                move || run(&pool, &shared)
            })
            .map_err(IoError::from)?;

        let signal = Arc::clone(&shared);
        pool.set_preflush_callback(Some(Arc::new(move || signal.request())));
        info!("preflush writer started");

        Ok(Self {
            pool,
            shared,
            thread: Some(thread),
        })
    }

    /// Asks for a round without waiting for the callback.
    pub fn trigger(&self) -> BufferResult<()> {
        if self.thread.as_ref().map_or(true, JoinHandle::is_finished) {
            return Err(BufferError::ShuttingDown);
        }
        self.shared.request();
        Ok(())
    }

    /// Returns the number of completed rounds.
    pub fn rounds(&self) -> u64 {
        self.shared.state.lock().rounds
    }

    /// Waits until at least `rounds` rounds completed.
    ///
    /// Returns false on timeout.
    pub fn wait_rounds(&self, rounds: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.rounds < rounds {
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                return state.rounds >= rounds;
            }
        }
        true
    }

    /// Stops the writer and waits for its thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.pool.set_preflush_callback(None);
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.wake.notify_one();
        }
        if thread.join().is_err() {
            warn!("preflush writer thread panicked");
        }
        info!("preflush writer stopped");
    }
}

impl Drop for PreflushWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PreflushWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreflushWriter")
            .field("running", &self.thread.is_some())
            .field("rounds", &self.rounds())
            .finish()
    }
}

fn run(pool: &BufferPool, shared: &WriterShared) {
    loop {
        {
            let mut state = shared.state.lock();
            while !state.requested && !state.shutdown {
                shared.wake.wait(&mut state);
            }
            if state.shutdown {
                return;
            }
            state.requested = false;
        }

        let batch = pool.get_preflush_batch();
        if !batch.is_empty() {
            match pool.preflush(&batch) {
                Ok(written) => debug!(harvested = batch.len(), written, "preflush round"),
                Err(err) => warn!(error = %err, "preflush round failed"),
            }
        }

        let mut state = shared.state.lock();
        state.rounds += 1;
        shared.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::buffer::BufferPoolConfig;
    use crate::file::MemoryBlockStore;

    fn addr(n: u64) -> BlockAddress {
        BlockAddress::new(n)
    }

    /// One partition of 8 slots; the whole partition is victim area.
    fn create_test_pool(threshold: usize) -> (Arc<BufferPool>, Arc<MemoryBlockStore>) {
        let store = Arc::new(MemoryBlockStore::new(16, 64));
        let config = BufferPoolConfig::new(8)
            .with_block_size(16)
            .with_partitions(1)
            .with_victim_percent(100)
            .with_preflush(threshold, 8);
        (Arc::new(BufferPool::new(config, store.clone()).unwrap()), store)
    }

    fn write_block(pool: &BufferPool, n: u64) {
        let mut h = pool.reach(Some(addr(n)), ReachRequest::write()).unwrap().unwrap();
        h.data_mut().fill(n as u8);
        h.release(ReleaseMode::dirty()).unwrap();
    }

    #[test]
    fn test_callback_fires_once_until_rearmed() {
        let (pool, _) = create_test_pool(2);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        pool.set_preflush_callback(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        write_block(&pool, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        write_block(&pool, 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        write_block(&pool, 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let batch = pool.get_preflush_batch();
        assert_eq!(batch, vec![addr(1), addr(2), addr(3)]);
        write_block(&pool, 4);
        write_block(&pool, 5);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_preflush_writes_and_cleans() {
        let (pool, store) = create_test_pool(0);
        write_block(&pool, 1);
        write_block(&pool, 2);

        let batch = pool.get_preflush_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(pool.preflush(&batch).unwrap(), 2);
        assert_eq!(store.writes_to(addr(1)), 1);
        assert_eq!(pool.dirty_count(), 0);
        assert_eq!(pool.stats().preflush_writes, 2);
        let parts = pool.partition_stats();
        assert_eq!(parts[0].current_flush, 0);
        assert_eq!(parts[0].clean_victims, 8);
    }

    #[test]
    fn test_preflush_skips_held_blocks() {
        let (pool, store) = create_test_pool(0);
        write_block(&pool, 1);
        let batch = pool.get_preflush_batch();
        let held = pool.reach(Some(addr(1)), ReachRequest::read_write()).unwrap().unwrap();
        assert_eq!(pool.preflush(&batch).unwrap(), 0);
        assert_eq!(store.writes_to(addr(1)), 0);
        held.release(ReleaseMode::clean()).unwrap();
    }

    #[test]
    fn test_preflush_skips_blocks_written_since_harvest() {
        let (pool, store) = create_test_pool(0);
        write_block(&pool, 1);
        let batch = pool.get_preflush_batch();
        assert_eq!(batch, vec![addr(1)]);

        // Flushed by its owner, then dirtied again as an ordinary block.
        let h = pool.reach(Some(addr(1)), ReachRequest::read_write()).unwrap().unwrap();
        h.release(ReleaseMode::flush()).unwrap();
        write_block(&pool, 1);
        assert_eq!(store.writes_to(addr(1)), 1);

        assert_eq!(pool.preflush(&batch).unwrap(), 0);
        assert_eq!(store.writes_to(addr(1)), 1);
        assert_eq!(pool.dirty_count(), 1);
        assert_eq!(pool.partition_stats()[0].current_flush, 0);
    }

    #[test]
    fn test_writer_drains_on_trigger() {
        let (pool, store) = create_test_pool(0);
        write_block(&pool, 1);
        write_block(&pool, 2);

        let writer = PreflushWriter::start(Arc::clone(&pool)).unwrap();
        writer.trigger().unwrap();
        assert!(writer.wait_rounds(1, Duration::from_secs(5)));
        assert_eq!(store.writes_to(addr(1)), 1);
        assert_eq!(store.writes_to(addr(2)), 1);
        writer.shutdown();
    }

    #[test]
    fn test_writer_woken_by_threshold() {
        let (pool, store) = create_test_pool(2);
        let writer = PreflushWriter::start(Arc::clone(&pool)).unwrap();
        write_block(&pool, 1);
        write_block(&pool, 2);
        assert!(writer.wait_rounds(1, Duration::from_secs(5)));
        assert_eq!(store.write_log().len(), 2);
        drop(writer);

        // Dropping the writer removed its callback.
        write_block(&pool, 3);
        write_block(&pool, 4);
        assert_eq!(store.write_log().len(), 2);
    }
}
