//! Transaction header and handle records.
//!
//! The header is the single persistent root of the engine:
//!
//! ```text
//! | magic (8) | small count (8) | large count (8) | small refs (8 each) | large refs (8 each) |
//! ```
//!
//! Each reference points to a handle record:
//!
//! ```text
//! | log array (8) | tail (8) | epoch (8) |
//! ```
//!
//! The magic is written and flushed only after every handle record and log
//! array is durable, so a valid magic proves the whole structure is sound.

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::LogArray;
use std::fmt;
use undolog_pmem::{Heap, PAddr, PPtr, PersistentMemory};

const HEADER_FIXED_SIZE: usize = 24;
const RECORD_SIZE: usize = 24;

/// Which pool a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolClass {
    /// Many handles with small logs.
    Small,
    /// Few handles with large logs.
    Large,
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// The durable part of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRecord {
    addr: PAddr,
    /// Current log backing array.
    pub log: PAddr,
    /// Durable write cursor.
    pub tail: u64,
    /// Current epoch; live entries carry it as their generation.
    pub epoch: u64,
}

impl HandleRecord {
    /// Allocates a record with a fresh log array of `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the heap cannot satisfy the allocations.
    pub fn create<M: PersistentMemory>(heap: &Heap<M>, capacity: usize) -> CoreResult<Self> {
        let log = LogArray::alloc(heap, capacity)?;
        let addr = heap.alloc(RECORD_SIZE)?;
        let record = Self {
            addr,
            log: log.addr(),
            tail: 0,
            epoch: 1,
        };
        record.store_all(heap.memory())?;
        Ok(record)
    }

    /// Loads the record at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityFatal`] if the record lies outside the heap
    /// or carries a zero epoch.
    pub fn load<M: PersistentMemory>(memory: &M, addr: PAddr) -> CoreResult<Self> {
        if !memory.contains(addr, RECORD_SIZE) {
            return Err(CoreError::integrity(format!(
                "handle record {addr} outside persistent heap"
            )));
        }
        let record = Self {
            addr,
            log: memory.load(Self::log_slot(addr))?,
            tail: memory.load(Self::tail_slot(addr))?,
            epoch: memory.load(Self::epoch_slot(addr))?,
        };
        if record.epoch == 0 {
            return Err(CoreError::integrity(format!(
                "handle record {addr} has a zero epoch"
            )));
        }
        Ok(record)
    }

    /// Address of the record.
    #[must_use]
    pub const fn addr(&self) -> PAddr {
        self.addr
    }

    /// Stores, flushes and fences all three words.
    ///
    /// # Errors
    ///
    /// Returns an error if a store or primitive fails.
    pub fn store_all<M: PersistentMemory>(&self, memory: &M) -> CoreResult<()> {
        memory.store(Self::log_slot(self.addr), self.log)?;
        memory.store(Self::tail_slot(self.addr), self.tail)?;
        memory.store(Self::epoch_slot(self.addr), self.epoch)?;
        memory.flush(self.addr, RECORD_SIZE)?;
        memory.fence()?;
        Ok(())
    }

    /// The same record pointed at a fresh `log` with an empty tail and the
    /// next epoch.
    #[must_use]
    pub fn renewed(&self, log: PAddr) -> Self {
        Self {
            addr: self.addr,
            log,
            tail: 0,
            epoch: next_epoch(self.epoch),
        }
    }

    /// Slot holding the log array pointer of the record at `addr`.
    pub(crate) const fn log_slot(addr: PAddr) -> PPtr<PAddr> {
        PPtr::new(addr)
    }

    /// Slot holding the tail of the record at `addr`.
    pub(crate) const fn tail_slot(addr: PAddr) -> PPtr<u64> {
        PPtr::new(addr.add(8))
    }

    /// Slot holding the epoch of the record at `addr`.
    pub(crate) const fn epoch_slot(addr: PAddr) -> PPtr<u64> {
        PPtr::new(addr.add(16))
    }
}

/// Returns the epoch following `epoch`, skipping 0.
pub(crate) const fn next_epoch(epoch: u64) -> u64 {
    if epoch == u64::MAX {
        1
    } else {
        epoch + 1
    }
}

/// The persistent root of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHeader {
    addr: PAddr,
    magic: u64,
    small: Vec<PAddr>,
    large: Vec<PAddr>,
}

impl TxHeader {
    /// Builds a new header and every handle it references.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the heap is exhausted.
    pub fn create<M: PersistentMemory>(heap: &Heap<M>, config: &EngineConfig) -> CoreResult<Self> {
        config.validate()?;
        let memory = heap.memory();
        let count = config.pool_size + config.large_pool_size;
        let addr = heap.alloc(HEADER_FIXED_SIZE + count * 8)?;

        let small = (0..config.pool_size)
            .map(|_| HandleRecord::create(heap, config.initial_log_capacity).map(|r| r.addr()))
            .collect::<CoreResult<Vec<_>>>()?;
        let large = (0..config.large_pool_size)
            .map(|_| HandleRecord::create(heap, config.large_log_capacity).map(|r| r.addr()))
            .collect::<CoreResult<Vec<_>>>()?;

        memory.store(PPtr::<u64>::new(addr.add(8)), small.len() as u64)?;
        memory.store(PPtr::<u64>::new(addr.add(16)), large.len() as u64)?;
        for (i, record) in small.iter().chain(large.iter()).enumerate() {
            memory.store(Self::ref_slot(addr, i), *record)?;
        }
        memory.flush(addr.add(8), HEADER_FIXED_SIZE - 8 + count * 8)?;
        memory.fence()?;

        // Magic goes last: it certifies everything above.
        memory.persist(PPtr::<u64>::new(addr), config.magic)?;

        Ok(Self {
            addr,
            magic: config.magic,
            small,
            large,
        })
    }

    /// Opens the header at `addr`, checking its magic against `magic`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityFatal`] if the header is out of bounds,
    /// its magic does not match, or its counts do not fit in the region.
    pub fn open<M: PersistentMemory>(memory: &M, addr: PAddr, magic: u64) -> CoreResult<Self> {
        if !memory.contains(addr, HEADER_FIXED_SIZE) {
            return Err(CoreError::integrity(format!(
                "transaction header {addr} outside persistent heap"
            )));
        }

        let found = memory.load(PPtr::<u64>::new(addr))?;
        if found != magic {
            return Err(CoreError::integrity(format!(
                "transaction header magic does not match: expected {magic}, found {found}"
            )));
        }

        let small_count = memory.load(PPtr::<u64>::new(addr.add(8)))? as usize;
        let large_count = memory.load(PPtr::<u64>::new(addr.add(16)))? as usize;
        let refs_fit = small_count
            .checked_add(large_count)
            .and_then(|n| n.checked_mul(8))
            .and_then(|bytes| bytes.checked_add(HEADER_FIXED_SIZE))
            .is_some_and(|bytes| memory.contains(addr, bytes));
        if !refs_fit {
            return Err(CoreError::integrity(format!(
                "transaction header {addr} references {small_count}+{large_count} handles beyond the region"
            )));
        }

        let mut refs = (0..small_count + large_count)
            .map(|i| memory.load(Self::ref_slot(addr, i)))
            .collect::<Result<Vec<_>, _>>()?;
        let large = refs.split_off(small_count);

        Ok(Self {
            addr,
            magic,
            small: refs,
            large,
        })
    }

    /// Address of the header; this is what the application stores in its root.
    #[must_use]
    pub const fn addr(&self) -> PAddr {
        self.addr
    }

    /// The validity marker.
    #[must_use]
    pub const fn magic(&self) -> u64 {
        self.magic
    }

    /// Handle record addresses of a pool.
    #[must_use]
    pub fn records(&self, class: PoolClass) -> &[PAddr] {
        match class {
            PoolClass::Small => &self.small,
            PoolClass::Large => &self.large,
        }
    }

    /// Every handle record with its pool and index, small pool first.
    pub fn all_records(&self) -> impl Iterator<Item = (PoolClass, usize, PAddr)> + '_ {
        let small = self
            .small
            .iter()
            .enumerate()
            .map(|(i, addr)| (PoolClass::Small, i, *addr));
        let large = self
            .large
            .iter()
            .enumerate()
            .map(|(i, addr)| (PoolClass::Large, i, *addr));
        small.chain(large)
    }

    const fn ref_slot(addr: PAddr, index: usize) -> PPtr<PAddr> {
        PPtr::new(addr.add((HEADER_FIXED_SIZE + index * 8) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use undolog_pmem::InMemoryRegion;

    fn heap() -> Heap<InMemoryRegion> {
        Heap::format(InMemoryRegion::new(256 * 1024)).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::new()
            .pool_size(3)
            .initial_log_capacity(4)
            .large_pool_size(1)
            .large_log_capacity(16)
    }

    #[test]
    fn create_then_open_after_crash() {
        let heap = heap();
        let header = TxHeader::create(&heap, &config()).unwrap();

        let region = heap.memory().crash();
        let opened = TxHeader::open(&region, header.addr(), config().magic).unwrap();
        assert_eq!(opened, header);
        assert_eq!(opened.records(PoolClass::Small).len(), 3);
        assert_eq!(opened.records(PoolClass::Large).len(), 1);
    }

    #[test]
    fn records_point_at_sized_logs() {
        let heap = heap();
        let header = TxHeader::create(&heap, &config()).unwrap();

        let small = HandleRecord::load(heap.memory(), header.records(PoolClass::Small)[0]).unwrap();
        let large = HandleRecord::load(heap.memory(), header.records(PoolClass::Large)[0]).unwrap();
        assert_eq!(LogArray::open(heap.memory(), small.log).unwrap().capacity(), 4);
        assert_eq!(LogArray::open(heap.memory(), large.log).unwrap().capacity(), 16);
        assert_eq!(small.tail, 0);
        assert_eq!(small.epoch, 1);
    }

    #[test]
    fn magic_mismatch_is_fatal() {
        let heap = heap();
        let header = TxHeader::create(&heap, &config()).unwrap();
        let result = TxHeader::open(heap.memory(), header.addr(), 42);
        assert!(matches!(result, Err(CoreError::IntegrityFatal { .. })));
    }

    #[test]
    fn unflushed_magic_is_not_trusted() {
        let heap = heap();
        let addr = heap.alloc(64).unwrap();
        heap.memory()
            .store(PPtr::<u64>::new(addr), config().magic)
            .unwrap();

        let region = heap.memory().crash();
        let result = TxHeader::open(&region, addr, config().magic);
        assert!(matches!(result, Err(CoreError::IntegrityFatal { .. })));
    }

    #[test]
    fn all_records_lists_small_first() {
        let heap = heap();
        let header = TxHeader::create(&heap, &config()).unwrap();
        let classes: Vec<_> = header.all_records().map(|(c, i, _)| (c, i)).collect();
        assert_eq!(
            classes,
            vec![
                (PoolClass::Small, 0),
                (PoolClass::Small, 1),
                (PoolClass::Small, 2),
                (PoolClass::Large, 0),
            ]
        );
    }

    #[test]
    fn next_epoch_skips_zero() {
        assert_eq!(next_epoch(1), 2);
        assert_eq!(next_epoch(u64::MAX), 1);
    }
}
