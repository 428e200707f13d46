//! Stress tests for undolog.
//!
//! These runners drive many transactions through an engine, from one
//! thread or several, and report throughput.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use undolog_core::{CoreError, CoreResult, Engine, TxHandle};
use undolog_pmem::{PPtr, PersistentMemory};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Transactions that completed as intended.
    pub successful_ops: usize,
    /// Transactions that returned an error.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} tx/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions to run.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Slots written by each transaction.
    pub writes_per_tx: usize,
    /// Number of distinct slots per thread.
    pub slot_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            writes_per_tx: 8,
            slot_count: 64,
        }
    }
}

/// Allocates `count` zeroed `u64` slots.
///
/// # Errors
///
/// Returns an error if the heap is exhausted.
pub fn alloc_counters<M: PersistentMemory>(
    engine: &Engine<M>,
    count: usize,
) -> CoreResult<Vec<PPtr<u64>>> {
    (0..count)
        .map(|_| engine.heap().alloc_value(0u64).map_err(CoreError::from))
        .collect()
}

/// Increments `writes` consecutive counters starting at `first` in one
/// transaction.
fn bump<M: PersistentMemory>(
    tx: &mut TxHandle<'_, M>,
    counters: &[PPtr<u64>],
    first: usize,
    writes: usize,
) -> CoreResult<()> {
    tx.exec(|tx| -> CoreResult<()> {
        for k in 0..writes {
            let counter = counters[(first + k) % counters.len()];
            let value = tx.read(counter)?;
            tx.log_set(counter, value + 1)?;
        }
        Ok(())
    })?
}

/// Run a sequential commit stress test on one handle.
pub fn stress_sequential_commits<M: PersistentMemory>(
    engine: &Engine<M>,
    counters: &[PPtr<u64>],
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let mut tx = match engine.acquire() {
        Ok(tx) => tx,
        Err(_) => return StressTestResult::new(0, config.operations, start.elapsed()),
    };

    for i in 0..config.operations {
        match bump(&mut tx, counters, i, config.writes_per_tx) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed commit/abort stress test.
///
/// Every third transaction is abandoned by releasing its handle before the
/// outermost `end`, so its writes are rolled back.
pub fn stress_commit_abort<M: PersistentMemory>(
    engine: &Engine<M>,
    counters: &[PPtr<u64>],
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let result = engine.acquire().and_then(|mut tx| {
            if i % 3 == 2 {
                tx.begin();
                for k in 0..config.writes_per_tx {
                    let counter = counters[(i + k) % counters.len()];
                    tx.log_set(counter, u64::MAX)?;
                }
                engine.release(tx)
            } else {
                bump(&mut tx, counters, i, config.writes_per_tx)
            }
        });

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent commit stress test.
///
/// Each thread owns a disjoint stripe of `config.slot_count` counters and
/// its own handle.
pub fn stress_concurrent_commits<M: PersistentMemory>(
    engine: &Engine<M>,
    counters: &[PPtr<u64>],
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    thread::scope(|s| {
        for stripe in counters.chunks(config.slot_count).take(config.threads) {
            let successful = &successful;
            let failed = &failed;
            s.spawn(move || {
                let mut tx = match engine.acquire() {
                    Ok(tx) => tx,
                    Err(_) => {
                        failed.fetch_add(ops_per_thread, Ordering::Relaxed);
                        return;
                    }
                };
                for i in 0..ops_per_thread {
                    match bump(&mut tx, stripe, i, config.writes_per_tx) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a handle churn stress test.
///
/// More threads than pool slots repeatedly acquire a handle, commit one
/// small transaction and release it, so acquisition has to block.
pub fn stress_handle_churn<M: PersistentMemory>(
    engine: &Engine<M>,
    counters: &[PPtr<u64>],
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    thread::scope(|s| {
        for (t, counter) in counters.iter().take(config.threads).enumerate() {
            let successful = &successful;
            let failed = &failed;
            s.spawn(move || {
                for _ in 0..ops_per_thread {
                    let result = engine
                        .acquire()
                        .and_then(|mut tx| bump(&mut tx, std::slice::from_ref(counter), t, 1));
                    match result {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
