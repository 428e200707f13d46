//! Benchmark utilities.

use rand::Rng;
use undolog_core::{Engine, EngineConfig};
use undolog_pmem::{Heap, InMemoryRegion, PAddr, PPtr, PersistentMemory};

/// Region size used by benchmark engines.
pub const BENCH_REGION_SIZE: usize = 16 << 20;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Opens a fresh in-memory engine.
pub fn bench_engine(config: EngineConfig) -> Engine<InMemoryRegion> {
    let heap = Heap::format(InMemoryRegion::new(BENCH_REGION_SIZE)).unwrap();
    Engine::open(heap, config).unwrap()
}

/// Allocates `count` durable `u64` slots with random contents.
pub fn alloc_slots<M: PersistentMemory>(engine: &Engine<M>, count: usize) -> Vec<PPtr<u64>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| engine.heap().alloc_value(rng.gen::<u64>()).unwrap())
        .collect()
}

/// Durable image of a region that crashed with `entries` undo records
/// pending on one handle, every new value already written back.
pub fn interrupted_image(entries: usize) -> Vec<u8> {
    let engine = bench_engine(
        EngineConfig::new()
            .pool_size(4)
            .initial_log_capacity(entries.max(1))
            .large_pool_size(0),
    );
    let slots = alloc_slots(&engine, entries);

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    for slot in &slots {
        tx.log_set(*slot, 0).unwrap();
    }

    let memory = engine.heap().memory();
    memory.flush(PAddr::new(0), BENCH_REGION_SIZE).unwrap();
    let image = memory.durable_image();
    std::mem::forget(tx);
    image
}
