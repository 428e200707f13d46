//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines
//! and common test scenarios.

use std::path::PathBuf;
use tempfile::TempDir;
use undolog_core::{Engine, EngineConfig};
use undolog_pmem::{FileRegion, Heap, InMemoryRegion, PAddr, PersistentMemory};

/// Region size used by fixtures unless a test asks for another.
pub const TEST_REGION_SIZE: usize = 1 << 20;

/// Engine configuration with small pools and logs, so growth and pool
/// exhaustion are reached quickly.
pub fn test_config() -> EngineConfig {
    EngineConfig::new()
        .pool_size(4)
        .initial_log_capacity(4)
        .large_pool_size(1)
        .large_log_capacity(64)
}

/// A test engine with automatic cleanup.
pub struct TestEngine<M: PersistentMemory> {
    /// The engine instance.
    pub engine: Engine<M>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine<InMemoryRegion> {
    /// Creates a new in-memory test engine.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Creates a new in-memory test engine with `config`.
    pub fn memory_with(config: EngineConfig) -> Self {
        let heap = Heap::format(InMemoryRegion::new(TEST_REGION_SIZE))
            .expect("Failed to format in-memory region");
        Self {
            engine: Engine::open(heap, config).expect("Failed to open in-memory engine"),
            _temp_dir: None,
        }
    }

    /// Simulates a power loss: keeps only what is durable and recovers.
    pub fn crash_and_recover(&self) -> Self {
        recover_image(self.engine.heap().memory().durable_image(), self.engine.config().clone())
    }
}

impl TestEngine<FileRegion> {
    /// Creates a new file-backed test engine.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(REGION_FILE);

        let region = FileRegion::create(&path, TEST_REGION_SIZE as u64)
            .expect("Failed to create region file");
        let heap = Heap::format(region).expect("Failed to format region file");
        let engine = Engine::open(heap, test_config()).expect("Failed to open file engine");

        Self {
            engine,
            _temp_dir: Some(temp_dir),
        }
    }
}

impl<M: PersistentMemory> TestEngine<M> {
    /// Returns the region file path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join(REGION_FILE))
    }
}

const REGION_FILE: &str = "region.pmem";

impl<M: PersistentMemory> std::ops::Deref for TestEngine<M> {
    type Target = Engine<M>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Opens an engine over a copy of a durable image, running recovery.
pub fn recover_image(image: Vec<u8>, config: EngineConfig) -> TestEngine<InMemoryRegion> {
    let heap = Heap::open(InMemoryRegion::from_image(image)).expect("Failed to open crashed heap");
    TestEngine {
        engine: Engine::open(heap, config).expect("Failed to recover engine"),
        _temp_dir: None,
    }
}

/// Runs a test with a temporary in-memory engine.
///
/// # Example
///
/// ```rust
/// use undolog_pmem::PersistentMemory;
/// use undolog_testkit::with_temp_engine;
///
/// with_temp_engine(|engine| {
///     let x = engine.heap().alloc_value(1u64).unwrap();
///     let mut tx = engine.acquire().unwrap();
///     tx.begin();
///     tx.log_set(x, 2).unwrap();
///     tx.end().unwrap();
///     assert_eq!(engine.heap().memory().load(x).unwrap(), 2);
/// });
/// ```
pub fn with_temp_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine<InMemoryRegion>) -> R,
{
    let test_engine = TestEngine::memory();
    f(&test_engine.engine)
}

/// Runs a test with a temporary file-backed engine.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine<FileRegion>, &std::path::Path) -> R,
{
    let test_engine = TestEngine::file();
    let path = test_engine.path().expect("File engine should have a path");
    f(&test_engine.engine, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use undolog_pmem::PPtr;

    /// Creates an engine with `count` durable `u64` slots holding `0..count`.
    pub fn populated_engine(count: usize) -> (TestEngine<InMemoryRegion>, Vec<PPtr<u64>>) {
        let test_engine = TestEngine::memory();
        let slots = alloc_slots(&test_engine, count);
        (test_engine, slots)
    }

    /// Allocates `count` durable `u64` slots holding `0..count`.
    pub fn alloc_slots<M: PersistentMemory>(engine: &Engine<M>, count: usize) -> Vec<PPtr<u64>> {
        (0..count as u64)
            .map(|i| {
                engine
                    .heap()
                    .alloc_value(i)
                    .expect("Failed to allocate slot")
            })
            .collect()
    }

    /// Reads every slot.
    pub fn read_slots<M: PersistentMemory>(engine: &Engine<M>, slots: &[PPtr<u64>]) -> Vec<u64> {
        slots
            .iter()
            .map(|slot| engine.heap().memory().load(*slot).expect("Failed to read slot"))
            .collect()
    }

    /// Produces the durable image of an engine that crashed with a
    /// transaction open.
    ///
    /// Slot `i` holds `i` before the transaction and `i + 1000` inside it.
    /// Every dirty line is written back before the crash, so recovery has
    /// to undo all of them.
    pub fn interrupted_image(count: usize) -> (Vec<u8>, Vec<PPtr<u64>>) {
        let (test_engine, slots) = populated_engine(count);
        let engine = &test_engine.engine;

        let mut tx = engine.acquire().expect("Failed to acquire handle");
        tx.begin();
        for (i, slot) in slots.iter().enumerate() {
            tx.log_set(*slot, i as u64 + 1000)
                .expect("Failed to log slot");
        }

        let memory = engine.heap().memory();
        memory
            .flush(PAddr::new(0), TEST_REGION_SIZE)
            .expect("Failed to write back region");
        let image = memory.durable_image();
        std::mem::forget(tx);
        (image, slots)
    }
}
