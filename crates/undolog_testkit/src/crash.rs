//! Crash recovery testing for undolog.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It cuts power after a chosen number of flushes and verifies that the
//! engine recovers to a state where each transaction either happened
//! completely or not at all.
//!
//! ## Test Strategy
//!
//! 1. **Crash before commit** - Ensures interrupted transactions are undone
//! 2. **Crash after commit** - Ensures committed values survive
//! 3. **Crash at every flush** - Sweeps the crash point over a whole transaction
//! 4. **Crash during recovery** - Ensures recovery can itself be interrupted
//!
//! ## Usage
//!
//! ```rust
//! use undolog_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::test_config;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use undolog_core::{CoreError, CoreResult, Engine, EngineConfig};
use undolog_pmem::{
    Heap, InMemoryRegion, PAddr, PPtr, PersistentMemory, PmemError, PmemResult,
};

/// Result of a crash recovery test.
#[derive(Debug, Clone, Serialize)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Crash points exercised.
    pub crash_points: u64,
    /// Slot values expected after recovery.
    pub expected: Vec<u64>,
    /// Slot values found after recovery.
    pub actual: Vec<u64>,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, crash_points: u64, values: Vec<u64>) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            crash_points,
            expected: values.clone(),
            actual: values,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: Vec<u64>, actual: Vec<u64>, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            crash_points: 0,
            expected,
            actual,
            error: Some(error.to_string()),
        }
    }
}

/// A region wrapper that loses power after a set number of flushes.
///
/// Once the budget is spent, flushes no longer reach the durable image, so
/// [`CrashableRegion::crash`] returns exactly what a machine that lost power
/// at that moment would find. By default the engine keeps running unaware;
/// with [`set_fail_on_flush`](Self::set_fail_on_flush) the lost flushes
/// return an I/O error instead.
#[derive(Debug)]
pub struct CrashableRegion {
    inner: InMemoryRegion,
    crash_after_flushes: AtomicU64,
    flushes: AtomicU64,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashableRegion {
    /// Creates a zeroed crashable region of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::wrap(InMemoryRegion::new(size))
    }

    /// Creates a crashable region starting from a durable image.
    pub fn from_image(image: Vec<u8>) -> Self {
        Self::wrap(InMemoryRegion::from_image(image))
    }

    fn wrap(inner: InMemoryRegion) -> Self {
        Self {
            inner,
            crash_after_flushes: AtomicU64::new(u64::MAX),
            flushes: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        }
    }

    /// Lets `flushes` more flushes land, then cuts power.
    pub fn crash_after(&self, flushes: u64) {
        let done = self.flushes.load(Ordering::SeqCst);
        self.crash_after_flushes
            .store(done.saturating_add(flushes), Ordering::SeqCst);
    }

    /// Sets whether flushes after the crash point should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state. The durable image is kept.
    pub fn reset(&self) {
        self.crash_after_flushes.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Returns whether power has been cut.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Number of flushes issued so far, landed or not.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Returns a region holding only what landed before the crash point.
    pub fn crash(&self) -> InMemoryRegion {
        self.inner.crash()
    }

    /// Returns a copy of the durable image.
    pub fn durable_image(&self) -> Vec<u8> {
        self.inner.durable_image()
    }
}

impl PersistentMemory for CrashableRegion {
    fn read_into(&self, addr: PAddr, buf: &mut [u8]) -> PmemResult<()> {
        self.inner.read_into(addr, buf)
    }

    fn write(&self, addr: PAddr, data: &[u8]) -> PmemResult<()> {
        self.inner.write(addr, data)
    }

    fn copy(&self, src: PAddr, dst: PAddr, len: usize) -> PmemResult<()> {
        self.inner.copy(src, dst, len)
    }

    fn flush(&self, addr: PAddr, len: usize) -> PmemResult<()> {
        let issued = self.flushes.fetch_add(1, Ordering::SeqCst);
        if issued < self.crash_after_flushes.load(Ordering::SeqCst) {
            return self.inner.flush(addr, len);
        }

        self.crashed.store(true, Ordering::SeqCst);
        if self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(PmemError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated power loss during flush",
            )));
        }
        // The stores stay visible in the working image but never land.
        self.inner.read(addr, len).map(drop)
    }

    fn fence(&self) -> PmemResult<()> {
        self.inner.fence()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

/// Test harness for crash recovery scenarios.
///
/// Every scenario works on a handful of `u64` slots. Slot `i` starts at
/// `i` and the transaction under test writes `i + 1000`.
pub struct CrashRecoveryHarness {
    /// Engine configuration used for every engine the harness opens.
    pub config: EngineConfig,
    /// Size of each simulated region.
    pub region_size: usize,
    /// Number of slots the test transaction writes.
    pub slots: usize,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashRecoveryHarness {
    /// Creates a harness with small logs so growth happens mid-transaction.
    pub fn new() -> Self {
        Self::with_config(test_config().initial_log_capacity(2))
    }

    /// Creates a harness that opens engines with `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            region_size: 1 << 16,
            slots: 5,
            results: Vec::new(),
        }
    }

    fn before(&self) -> Vec<u64> {
        (0..self.slots as u64).collect()
    }

    fn after(&self) -> Vec<u64> {
        (0..self.slots as u64).map(|i| i + 1000).collect()
    }

    fn prepare(&self) -> CoreResult<(Engine<CrashableRegion>, Vec<PPtr<u64>>)> {
        let heap = Heap::format(CrashableRegion::new(self.region_size))?;
        let engine = Engine::open(heap, self.config.clone())?;
        let slots = (0..self.slots as u64)
            .map(|i| engine.heap().alloc_value(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((engine, slots))
    }

    fn recover(&self, region: InMemoryRegion) -> CoreResult<Engine<InMemoryRegion>> {
        Engine::open(Heap::open(region)?, self.config.clone())
    }

    /// Runs the test transaction to completion.
    fn write_all<M: PersistentMemory>(engine: &Engine<M>, slots: &[PPtr<u64>]) -> CoreResult<()> {
        let mut tx = engine.acquire()?;
        tx.begin();
        for (i, slot) in slots.iter().enumerate() {
            tx.log_set(*slot, i as u64 + 1000)?;
        }
        tx.end()?;
        Ok(())
    }

    fn read_slots<M: PersistentMemory>(
        engine: &Engine<M>,
        slots: &[PPtr<u64>],
    ) -> CoreResult<Vec<u64>> {
        let memory = engine.heap().memory();
        slots
            .iter()
            .map(|slot| memory.load(*slot).map_err(CoreError::from))
            .collect()
    }

    fn record(&mut self, description: &str, outcome: CoreResult<CrashRecoveryResult>) {
        let result = outcome.unwrap_or_else(|e| {
            CrashRecoveryResult::fail(description, self.before(), Vec::new(), &e.to_string())
        });
        self.results.push(result);
    }

    /// Tests that a committed transaction survives a crash.
    pub fn test_committed_values_survive(&mut self) -> CrashRecoveryResult {
        let description = "Committed values survive crash";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (engine, slots) = self.prepare()?;
            Self::write_all(&engine, &slots)?;

            let recovered = self.recover(engine.heap().memory().crash())?;
            let actual = Self::read_slots(&recovered, &slots)?;
            Ok(self.judge(description, 1, self.after(), actual))
        })();
        self.record(description, outcome);
        self.last()
    }

    /// Tests that an interrupted transaction is undone even when every
    /// new value reached durable media.
    pub fn test_interrupted_transaction_undone(&mut self) -> CrashRecoveryResult {
        let description = "Interrupted transaction undone after full write-back";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (engine, slots) = self.prepare()?;
            let image = {
                let mut tx = engine.acquire()?;
                tx.begin();
                for (i, slot) in slots.iter().enumerate() {
                    tx.log_set(*slot, i as u64 + 1000)?;
                }
                let memory = engine.heap().memory();
                memory.flush(PAddr::new(0), self.region_size)?;
                let image = memory.durable_image();
                std::mem::forget(tx);
                image
            };

            let recovered = self.recover(InMemoryRegion::from_image(image))?;
            let actual = Self::read_slots(&recovered, &slots)?;
            Ok(self.judge(description, 1, self.before(), actual))
        })();
        self.record(description, outcome);
        self.last()
    }

    /// Tests that a crash after an inner `end` still undoes the whole unit.
    pub fn test_nested_transaction_undone(&mut self) -> CrashRecoveryResult {
        let description = "Inner end does not commit nested work";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (engine, slots) = self.prepare()?;
            let image = {
                let mut tx = engine.acquire()?;
                tx.begin();
                for (i, slot) in slots.iter().enumerate() {
                    tx.begin();
                    tx.log_set(*slot, i as u64 + 1000)?;
                    tx.end()?;
                }
                let memory = engine.heap().memory();
                memory.flush(PAddr::new(0), self.region_size)?;
                let image = memory.durable_image();
                std::mem::forget(tx);
                image
            };

            let recovered = self.recover(InMemoryRegion::from_image(image))?;
            let actual = Self::read_slots(&recovered, &slots)?;
            Ok(self.judge(description, 1, self.before(), actual))
        })();
        self.record(description, outcome);
        self.last()
    }

    /// Cuts power after each flush of a whole transaction in turn.
    ///
    /// Recovery must always find either every old value or every new one,
    /// and only the new ones once the transaction has returned from `end`.
    pub fn test_crash_at_every_flush(&mut self) -> CrashRecoveryResult {
        let description = "Crash at every flush of a transaction";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let total = {
                let (engine, slots) = self.prepare()?;
                let start = engine.heap().memory().flush_count();
                Self::write_all(&engine, &slots)?;
                engine.heap().memory().flush_count() - start
            };

            for point in 0..=total {
                let (engine, slots) = self.prepare()?;
                engine.heap().memory().crash_after(point);
                Self::write_all(&engine, &slots)?;

                let recovered = self.recover(engine.heap().memory().crash())?;
                let actual = Self::read_slots(&recovered, &slots)?;
                let complete = point == total;
                let atomic = actual == self.before() || actual == self.after();
                if !atomic || (complete && actual != self.after()) {
                    let expected = if complete { self.after() } else { self.before() };
                    return Ok(CrashRecoveryResult::fail(
                        description,
                        expected,
                        actual,
                        &format!("crash after flush {point} of {total}"),
                    ));
                }
            }
            Ok(CrashRecoveryResult::pass(description, total + 1, self.after()))
        })();
        self.record(description, outcome);
        self.last()
    }

    /// Cuts power at each flush of recovery, then recovers again.
    pub fn test_crash_during_recovery(&mut self) -> CrashRecoveryResult {
        let description = "Crash during recovery";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (engine, slots) = self.prepare()?;
            let image = {
                let mut tx = engine.acquire()?;
                tx.begin();
                for (i, slot) in slots.iter().enumerate() {
                    tx.log_set(*slot, i as u64 + 1000)?;
                }
                let memory = engine.heap().memory();
                memory.flush(PAddr::new(0), self.region_size)?;
                let image = memory.durable_image();
                std::mem::forget(tx);
                image
            };

            let total = {
                let region = CrashableRegion::from_image(image.clone());
                let recovered = Engine::open(Heap::open(region)?, self.config.clone())?;
                recovered.heap().memory().flush_count()
            };

            for point in 0..=total {
                let region = CrashableRegion::from_image(image.clone());
                region.crash_after(point);
                let interrupted = Engine::open(Heap::open(region)?, self.config.clone())?;

                let recovered = self.recover(interrupted.heap().memory().crash())?;
                let actual = Self::read_slots(&recovered, &slots)?;
                if actual != self.before() {
                    return Ok(CrashRecoveryResult::fail(
                        description,
                        self.before(),
                        actual,
                        &format!("crash after recovery flush {point} of {total}"),
                    ));
                }
            }
            Ok(CrashRecoveryResult::pass(description, total + 1, self.before()))
        })();
        self.record(description, outcome);
        self.last()
    }

    /// Tests that a failing flush surfaces as an error and leaves a
    /// recoverable region.
    pub fn test_flush_failure_is_recoverable(&mut self) -> CrashRecoveryResult {
        let description = "Failed flush leaves region recoverable";
        let outcome = (|| -> CoreResult<CrashRecoveryResult> {
            let (engine, slots) = self.prepare()?;
            let memory = engine.heap().memory();
            memory.set_fail_on_flush(true);
            memory.crash_after(3);

            if Self::write_all(&engine, &slots).is_ok() {
                return Ok(CrashRecoveryResult::fail(
                    description,
                    self.before(),
                    Vec::new(),
                    "transaction succeeded after power loss",
                ));
            }

            let recovered = self.recover(memory.crash())?;
            let actual = Self::read_slots(&recovered, &slots)?;
            Ok(self.judge(description, 1, self.before(), actual))
        })();
        self.record(description, outcome);
        self.last()
    }

    fn judge(
        &self,
        description: &str,
        crash_points: u64,
        expected: Vec<u64>,
        actual: Vec<u64>,
    ) -> CrashRecoveryResult {
        if actual == expected {
            CrashRecoveryResult::pass(description, crash_points, actual)
        } else {
            CrashRecoveryResult::fail(description, expected, actual, "values differ after recovery")
        }
    }

    fn last(&self) -> CrashRecoveryResult {
        self.results
            .last()
            .cloned()
            .unwrap_or_else(|| CrashRecoveryResult::fail("no result", Vec::new(), Vec::new(), ""))
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_committed_values_survive();
        self.test_interrupted_transaction_undone();
        self.test_nested_transaction_undone();
        self.test_crash_at_every_flush();
        self.test_crash_during_recovery();
        self.test_flush_failure_is_recoverable();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total = self.results.len();

        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\n\
             Passed: {}/{}\n\n",
            passed, total
        );

        for result in &self.results {
            let status = if result.passed { "ok" } else { "FAILED" };
            summary.push_str(&format!(
                "[{}] {} ({} crash points)\n  Expected: {:?}\n  Actual:   {:?}\n",
                status, result.description, result.crash_points, result.expected, result.actual
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {}\n", error));
            }
        }

        summary
    }

    /// Returns the results as pretty-printed JSON.
    pub fn report_json(&self) -> String {
        serde_json::to_string_pretty(&self.results).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
