//! Binding records kept with the `alloc-tracking` feature.
#![cfg(feature = "alloc-tracking")]

use std::sync::Arc;

use strata_common::types::BlockAddress;
use strata_storage::buffer::{BufferPool, BufferPoolConfig, ReachRequest, ReleaseMode};
use strata_storage::file::MemoryBlockStore;

fn create_pool() -> BufferPool {
    let store = Arc::new(MemoryBlockStore::new(16, 64));
    BufferPool::new(BufferPoolConfig::new(4).with_block_size(16), store).unwrap()
}

#[test]
fn test_set_address_is_recorded() {
    let pool = create_pool();
    let mut h = pool.reach(None, ReachRequest::alloc()).unwrap().unwrap();
    h.set_address(BlockAddress::new(12)).unwrap();
    let slot = h.slot_id();
    h.release(ReleaseMode::dirty()).unwrap();

    assert_eq!(pool.allocation_dump(), format!("12 -> slot {slot}\n"));
}

#[test]
fn test_relocate_moves_record() {
    let pool = create_pool();
    let mut h = pool.reach(None, ReachRequest::alloc()).unwrap().unwrap();
    h.set_address(BlockAddress::new(3)).unwrap();
    let h = h.relocate(BlockAddress::new(30)).unwrap();
    let slot = h.slot_id();
    h.release(ReleaseMode::dirty()).unwrap();

    assert_eq!(pool.allocation_dump(), format!("30 -> slot {slot}\n"));
}

#[test]
fn test_discard_forgets_record() {
    let pool = create_pool();
    let mut h = pool.reach(None, ReachRequest::alloc()).unwrap().unwrap();
    h.set_address(BlockAddress::new(5)).unwrap();
    h.release(ReleaseMode::discard()).unwrap();

    assert!(pool.allocation_dump().is_empty());
    assert!(!pool.contains(BlockAddress::new(5)));
}
