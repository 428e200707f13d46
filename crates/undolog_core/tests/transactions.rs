//! Integration tests for transaction semantics on a live engine.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use undolog_core::{CoreError, Engine, EngineConfig};
use undolog_pmem::{Heap, InMemoryRegion, PAddr, PPtr, PVec, PersistentMemory};

fn engine_with(config: EngineConfig) -> Engine<InMemoryRegion> {
    let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
    Engine::open(heap, config).unwrap()
}

fn engine() -> Engine<InMemoryRegion> {
    engine_with(
        EngineConfig::new()
            .pool_size(2)
            .initial_log_capacity(4)
            .large_pool_size(1)
            .large_log_capacity(64),
    )
}

fn store_array(heap: &Heap<InMemoryRegion>, values: &[u32]) -> PAddr {
    let data = heap.alloc_array::<u32>(values.len()).unwrap();
    for (i, v) in values.iter().enumerate() {
        heap.memory()
            .store(PPtr::<u32>::new(data.add(i as u64 * 4)), *v)
            .unwrap();
    }
    heap.memory().flush(data, values.len() * 4).unwrap();
    heap.memory().fence().unwrap();
    data
}

fn load_array(region: &InMemoryRegion, data: PAddr, len: usize) -> Vec<u32> {
    (0..len)
        .map(|i| region.load(PPtr::<u32>::new(data.add(i as u64 * 4))).unwrap())
        .collect()
}

#[test]
fn empty_commit_flushes_nothing() {
    let engine = engine();
    let mut tx = engine.acquire().unwrap();
    engine.heap().memory().reset_counters();

    tx.begin();
    assert!(tx.end().unwrap());

    assert_eq!(engine.heap().memory().flush_count(), 0);
    assert_eq!(tx.logged(), 0);
    assert_eq!(engine.stats().transactions_committed(), 1);
}

#[test]
fn inner_end_defers_everything() {
    let engine = engine();
    let lock = Arc::new(RwLock::new(()));
    let x = engine.heap().alloc_value(1u64).unwrap();
    let mut tx = engine.acquire().unwrap();

    tx.begin();
    tx.begin();
    tx.wlock(&lock);
    tx.log_set(x, 2).unwrap();

    engine.heap().memory().reset_counters();
    assert!(!tx.end().unwrap());
    assert_eq!(engine.heap().memory().flush_count(), 0);
    assert_eq!(tx.logged(), 1);
    assert_eq!(tx.held_locks(), 1);
    assert_eq!(engine.heap().memory().crash().load(x).unwrap(), 1);

    assert!(tx.end().unwrap());
    assert_eq!(tx.logged(), 0);
    assert_eq!(tx.held_locks(), 0);
    assert_eq!(engine.heap().memory().crash().load(x).unwrap(), 2);
}

#[test]
fn commit_flushes_new_values() {
    let engine = engine();
    let a = engine.heap().alloc_value(1u32).unwrap();
    let b = engine.heap().alloc_value(2u32).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.log(a).unwrap();
    engine.heap().memory().store(a, 10).unwrap();
    tx.log_set(b, 20).unwrap();
    tx.end().unwrap();

    let durable = engine.heap().memory().crash();
    assert_eq!(durable.load(a).unwrap(), 10);
    assert_eq!(durable.load(b).unwrap(), 20);
}

#[test]
fn release_rolls_back_in_reverse_order() {
    let engine = engine();
    let x = engine.heap().alloc_value(1u64).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.log_set(x, 2).unwrap();
    tx.log_set(x, 3).unwrap();
    tx.log_set(x, 4).unwrap();
    engine.release(tx).unwrap();

    assert_eq!(engine.heap().memory().load(x).unwrap(), 1);
    assert_eq!(engine.heap().memory().crash().load(x).unwrap(), 1);
}

#[test]
fn released_handle_is_clean_for_next_user() {
    let engine = engine_with(EngineConfig::new().pool_size(1).large_pool_size(0));
    let x = engine.heap().alloc_value(1u64).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.log_set(x, 2).unwrap();
    drop(tx);

    let mut tx = engine.acquire().unwrap();
    assert!(tx.is_idle());
    assert_eq!(tx.logged(), 0);
    tx.begin();
    tx.log_set(x, 3).unwrap();
    tx.end().unwrap();
    assert_eq!(engine.heap().memory().load(x).unwrap(), 3);
}

#[test]
fn lock_released_exactly_once() {
    let engine = engine();
    let lock = Arc::new(RwLock::new(0u32));
    let x = engine.heap().alloc_value(0u64).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.lock(&lock);
    tx.log_set(x, 1).unwrap();
    assert!(tx.end().unwrap());
    assert!(tx.end().unwrap());

    assert!(lock.try_write().is_some());

    tx.begin();
    tx.rlock(&lock);
    assert!(lock.try_write().is_none());
    tx.end().unwrap();
    assert!(lock.try_write().is_some());
}

#[test]
fn vec_commit_flushes_new_backing_array() {
    let engine = engine();
    let heap = engine.heap();
    let old = store_array(heap, &[1, 2, 3]);
    let vec = heap.alloc_value(PVec::<u32>::new(old, 3, 3)).unwrap();
    let new = heap.alloc_array::<u32>(4).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.log_vec(vec).unwrap();
    for (i, v) in [7u32, 8, 9, 10].iter().enumerate() {
        heap.memory()
            .store(PPtr::<u32>::new(new.add(i as u64 * 4)), *v)
            .unwrap();
    }
    heap.memory().store(vec, PVec::new(new, 4, 4)).unwrap();
    tx.end().unwrap();

    let durable = heap.memory().crash();
    assert_eq!(durable.load(vec).unwrap(), PVec::new(new, 4, 4));
    assert_eq!(load_array(&durable, new, 4), vec![7, 8, 9, 10]);
}

struct ReplacedArray {
    durable: InMemoryRegion,
    old: PAddr,
    new: PAddr,
    flushed_bytes: u64,
    flushes: u64,
}

/// Logs a vector, scribbles over its backing array, repoints it at a new
/// two-element array and commits, counting only the commit's flushes.
fn commit_replaced_array(old_values: &[u32]) -> ReplacedArray {
    let engine = engine();
    let heap = engine.heap();
    let memory = heap.memory();
    let old = store_array(heap, old_values);
    let len = old_values.len() as u64;
    let vec = heap.alloc_value(PVec::<u32>::new(old, len, len)).unwrap();
    let new = heap.alloc_array::<u32>(2).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.log_vec(vec).unwrap();
    for i in 0..len {
        memory.store(PPtr::<u32>::new(old.add(i * 4)), 0xdead).unwrap();
    }
    memory.store(PPtr::<u32>::new(new), 5).unwrap();
    memory.store(PPtr::<u32>::new(new.add(4)), 6).unwrap();
    memory.store(vec, PVec::new(new, 2, 2)).unwrap();

    memory.reset_counters();
    assert!(tx.end().unwrap());

    let durable = memory.crash();
    assert_eq!(durable.load(vec).unwrap(), PVec::new(new, 2, 2));
    ReplacedArray {
        durable,
        old,
        new,
        flushed_bytes: memory.flushed_bytes(),
        flushes: memory.flush_count(),
    }
}

#[test]
fn replaced_backing_array_is_not_flushed_at_commit() {
    let narrow = commit_replaced_array(&[1, 2, 3]);
    assert_eq!(load_array(&narrow.durable, narrow.new, 2), vec![5, 6]);
    assert_eq!(load_array(&narrow.durable, narrow.old, 3), vec![1, 2, 3]);

    // Commit cost depends on the header and the new contents only.
    let wide = commit_replaced_array(&[4; 64]);
    assert_eq!(load_array(&wide.durable, wide.new, 2), vec![5, 6]);
    assert_eq!(load_array(&wide.durable, wide.old, 64), vec![4; 64]);
    assert_eq!(wide.flushed_bytes, narrow.flushed_bytes);
    assert_eq!(wide.flushes, narrow.flushes);
}

#[test]
fn vec_abort_restores_header_and_contents() {
    let engine = engine();
    let heap = engine.heap();
    let data = store_array(heap, &[1, 2, 3]);
    let vec = heap.alloc_value(PVec::<u32>::new(data, 3, 3)).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.begin();
    tx.log_vec(vec).unwrap();
    heap.memory()
        .store(PPtr::<u32>::new(data.add(4)), 99)
        .unwrap();
    heap.memory().store(vec, PVec::new(data, 1, 3)).unwrap();
    assert_eq!(tx.read_range(vec, 0, 1).unwrap(), vec![1]);
    engine.release(tx).unwrap();

    assert_eq!(heap.memory().load(vec).unwrap(), PVec::new(data, 3, 3));
    assert_eq!(load_array(heap.memory(), data, 3), vec![1, 2, 3]);
}

#[test]
fn large_handle_logs_without_growth() {
    let engine = engine();
    let values: Vec<_> = (0..40u64)
        .map(|i| engine.heap().alloc_value(i).unwrap())
        .collect();

    let mut tx = engine.acquire_large().unwrap();
    tx.begin();
    for ptr in &values {
        tx.log_set(*ptr, 0).unwrap();
    }
    tx.end().unwrap();

    assert_eq!(engine.stats().log_growths(), 0);
    assert_eq!(tx.capacity(), 64);
}

#[test]
fn logging_outside_begin_is_rolled_back_at_release() {
    let engine = engine();
    let x = engine.heap().alloc_value(5u64).unwrap();

    let mut tx = engine.acquire().unwrap();
    tx.log_set(x, 6).unwrap();
    assert!(tx.end().unwrap());
    assert_eq!(tx.logged(), 1);
    drop(tx);

    assert_eq!(engine.heap().memory().load(x).unwrap(), 5);
}

#[test]
fn exec_reports_unbalanced_closure() {
    let engine = engine();
    let mut tx = engine.acquire().unwrap();
    let result = tx.exec(|tx| {
        tx.begin();
        tx.begin();
        tx.end().unwrap();
    });
    assert!(matches!(result, Err(CoreError::UnbalancedNesting { .. })));
}

#[test]
fn third_acquire_blocks_until_release() {
    let engine = engine_with(EngineConfig::new().pool_size(2).large_pool_size(0));
    let acquired = AtomicBool::new(false);

    let a = engine.acquire().unwrap();
    let _b = engine.acquire().unwrap();
    assert!(engine.try_acquire().unwrap().is_none());

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let tx = engine.acquire().unwrap();
            acquired.store(true, Ordering::SeqCst);
            tx.index()
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        let released = a.index();
        engine.release(a).unwrap();
        assert_eq!(waiter.join().unwrap(), released);
    });
    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
fn concurrent_handles_commit_independently() {
    let engine = engine_with(
        EngineConfig::new()
            .pool_size(4)
            .initial_log_capacity(2)
            .large_pool_size(0),
    );
    let counters: Vec<PPtr<u64>> = (0..4)
        .map(|_| engine.heap().alloc_value(0u64).unwrap())
        .collect();

    thread::scope(|s| {
        for counter in &counters {
            let engine = &engine;
            s.spawn(move || {
                let mut tx = engine.acquire().unwrap();
                for _ in 0..25 {
                    tx.exec(|tx| {
                        let v = tx.read(*counter).unwrap();
                        tx.log_set(*counter, v + 1).unwrap();
                    })
                    .unwrap();
                }
            });
        }
    });

    let durable = engine.heap().memory().crash();
    for counter in &counters {
        assert_eq!(durable.load(*counter).unwrap(), 25);
    }
    assert_eq!(engine.stats().transactions_committed(), 100);
}
