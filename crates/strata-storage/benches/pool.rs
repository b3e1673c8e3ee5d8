//! Page cache benchmarks for Strata.
//!
//! Benchmarks for:
//! - Cached reads (hit path)
//! - Random reads over a working set larger than the pool
//! - Dirty writes with write-back on eviction
//! - Checkpoint rounds

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_common::types::BlockAddress;
use strata_storage::buffer::{BufferPool, BufferPoolConfig, ReachRequest, ReleaseMode};
use strata_storage::file::MemoryBlockStore;

const BLOCK: usize = 4096;

fn create_pool(slots: usize, blocks: u64) -> BufferPool {
    let store = Arc::new(MemoryBlockStore::new(BLOCK, blocks));
    BufferPool::new(BufferPoolConfig::new(slots).with_block_size(BLOCK), store).unwrap()
}

/// Random addresses in `0..range`.
fn generate_addresses(count: usize, range: u64) -> Vec<BlockAddress> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| BlockAddress::new(rng.gen_range(0..range)))
        .collect()
}

/// Benchmark reads of a resident working set.
fn bench_read_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/read_hit");
    let pool = create_pool(1024, 1024);
    let addresses = generate_addresses(10_000, 512);
    for &address in &addresses {
        let h = pool.reach(Some(address), ReachRequest::read()).unwrap().unwrap();
        h.release(ReleaseMode::clean()).unwrap();
    }

    group.throughput(Throughput::Elements(addresses.len() as u64));
    group.bench_function("resident", |b| {
        b.iter(|| {
            for &address in &addresses {
                let h = pool.reach(Some(address), ReachRequest::read()).unwrap().unwrap();
                black_box(h.data()[0]);
                h.release(ReleaseMode::clean()).unwrap();
            }
        });
    });
    group.finish();
}

/// Benchmark reads over working sets larger than the pool.
fn bench_read_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/read_random");

    for range in [512u64, 2048, 8192].iter() {
        let pool = create_pool(1024, *range);
        let addresses = generate_addresses(10_000, *range);

        group.throughput(Throughput::Elements(addresses.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(range), range, |b, _| {
            b.iter(|| {
                for &address in &addresses {
                    let h = pool.reach(Some(address), ReachRequest::read()).unwrap().unwrap();
                    h.release(ReleaseMode::clean()).unwrap();
                }
            });
        });
        black_box(pool.stats().hit_ratio());
    }

    group.finish();
}

/// Benchmark dirty writes that force write-back of victims.
fn bench_write_back(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/write_back");
    let pool = create_pool(256, 4096);
    let addresses = generate_addresses(5_000, 4096);

    group.throughput(Throughput::Elements(addresses.len() as u64));
    group.bench_function("dirty", |b| {
        b.iter(|| {
            for &address in &addresses {
                let mut h = pool.reach(Some(address), ReachRequest::write()).unwrap().unwrap();
                h.data_mut()[0] = 1;
                h.release(ReleaseMode::dirty()).unwrap();
            }
        });
    });
    group.finish();
}

/// Benchmark a full checkpoint of a dirty pool.
fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/checkpoint");

    for dirty in [64usize, 512].iter() {
        let pool = create_pool(1024, 1024);
        group.throughput(Throughput::Elements(*dirty as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dirty), dirty, |b, &dirty| {
            b.iter(|| {
                for n in 0..dirty as u64 {
                    let mut h = pool
                        .reach(Some(BlockAddress::new(n)), ReachRequest::write())
                        .unwrap()
                        .unwrap();
                    h.data_mut()[0] = n as u8;
                    h.release(ReleaseMode::dirty()).unwrap();
                }
                black_box(pool.checkpoint(64).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_read_hit,
    bench_read_random,
    bench_write_back,
    bench_checkpoint,
);

criterion_main!(benches);
