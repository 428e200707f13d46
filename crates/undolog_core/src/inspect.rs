//! Read-only inspection of engine state.
//!
//! Inspection never writes to the region and never runs recovery, so it is
//! safe on a region whose last process crashed.

use crate::error::CoreResult;
use crate::header::{HandleRecord, PoolClass, TxHeader};
use crate::log::LogArray;
use undolog_pmem::{PAddr, PersistentMemory};

/// State of one handle as found in the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleReport {
    /// Pool the handle belongs to.
    pub class: PoolClass,
    /// Index within the pool.
    pub index: usize,
    /// Address of the handle record.
    pub record: PAddr,
    /// Address of the log array.
    pub log: PAddr,
    /// Log capacity in entries.
    pub capacity: usize,
    /// Durable write cursor.
    pub tail: u64,
    /// Current epoch.
    pub epoch: u64,
    /// Entries recovery would replay.
    pub live_entries: usize,
    /// Nonzero entries from finished cycles.
    pub stale_entries: usize,
}

impl HandleReport {
    /// Returns true if recovery would have nothing to undo.
    pub fn is_clean(&self) -> bool {
        self.live_entries == 0 && self.tail == 0
    }
}

/// State of a whole transaction header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionReport {
    /// Address of the header.
    pub header: PAddr,
    /// Header validity marker.
    pub magic: u64,
    /// Handles that could be read.
    pub handles: Vec<HandleReport>,
    /// Handles that could not be read, with the reason.
    pub problems: Vec<String>,
}

impl RegionReport {
    /// Number of handles in a pool, including unreadable ones.
    pub fn pool_size(&self, class: PoolClass) -> usize {
        self.handles.iter().filter(|h| h.class == class).count()
            + self
                .problems
                .iter()
                .filter(|p| p.starts_with(&format!("{class}/")))
                .count()
    }

    /// Handles with an interrupted transaction.
    pub fn interrupted(&self) -> impl Iterator<Item = &HandleReport> {
        self.handles.iter().filter(|h| !h.is_clean())
    }

    /// Returns true if every handle is readable and clean.
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty() && self.handles.iter().all(HandleReport::is_clean)
    }
}

/// Reads the header at `root` and every handle it references.
///
/// Unreadable handles are listed in [`RegionReport::problems`] rather than
/// failing the whole inspection.
///
/// # Errors
///
/// Returns [`crate::CoreError::IntegrityFatal`] if the header itself is
/// invalid.
pub fn inspect<M: PersistentMemory>(
    memory: &M,
    root: PAddr,
    magic: u64,
) -> CoreResult<RegionReport> {
    let header = TxHeader::open(memory, root, magic)?;
    let mut report = RegionReport {
        header: header.addr(),
        magic: header.magic(),
        ..RegionReport::default()
    };

    for (class, index, record) in header.all_records() {
        match inspect_handle(memory, class, index, record) {
            Ok(handle) => report.handles.push(handle),
            Err(e) => report.problems.push(format!("{class}/{index}: {e}")),
        }
    }
    Ok(report)
}

fn inspect_handle<M: PersistentMemory>(
    memory: &M,
    class: PoolClass,
    index: usize,
    addr: PAddr,
) -> CoreResult<HandleReport> {
    let record = HandleRecord::load(memory, addr)?;
    let log = LogArray::open(memory, record.log)?;

    let mut live_entries = 0;
    let mut stale_entries = 0;
    for slot in 0..log.capacity() {
        let entry = log.read(memory, slot)?;
        if entry.is_live(record.epoch) {
            live_entries += 1;
        } else if !entry.is_empty() {
            stale_entries += 1;
        }
    }

    Ok(HandleReport {
        class,
        index,
        record: addr,
        log: record.log,
        capacity: log.capacity(),
        tail: record.tail,
        epoch: record.epoch,
        live_entries,
        stale_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoreError, Engine, EngineConfig};
    use undolog_pmem::{Heap, InMemoryRegion};

    fn config() -> EngineConfig {
        EngineConfig::new()
            .pool_size(2)
            .initial_log_capacity(4)
            .large_pool_size(1)
            .large_log_capacity(8)
    }

    fn engine() -> Engine<InMemoryRegion> {
        let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
        Engine::open(heap, config()).unwrap()
    }

    fn report(engine: &Engine<InMemoryRegion>) -> RegionReport {
        inspect(engine.heap().memory(), engine.header_addr(), config().magic).unwrap()
    }

    #[test]
    fn fresh_engine_is_clean() {
        let engine = engine();
        let report = report(&engine);

        assert!(report.is_clean());
        assert_eq!(report.pool_size(PoolClass::Small), 2);
        assert_eq!(report.pool_size(PoolClass::Large), 1);
        assert_eq!(report.handles[2].capacity, 8);
    }

    #[test]
    fn open_transaction_is_reported() {
        let engine = engine();
        let x = engine.heap().alloc_value(1u64).unwrap();
        let mut tx = engine.acquire().unwrap();
        tx.begin();
        tx.log_set(x, 2).unwrap();

        let report = report(&engine);
        assert!(!report.is_clean());
        let busy: Vec<_> = report.interrupted().collect();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].live_entries, 1);
        assert_eq!(busy[0].tail, 1);
    }

    #[test]
    fn wrong_magic_fails() {
        let engine = engine();
        let result = inspect(engine.heap().memory(), engine.header_addr(), 5);
        assert!(matches!(result, Err(CoreError::IntegrityFatal { .. })));
    }
}
