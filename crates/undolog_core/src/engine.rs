//! Engine entry point.

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::header::{PoolClass, TxHeader};
use crate::recovery::{self, RecoverySummary};
use crate::stats::EngineStats;
use crate::transaction::{HandlePool, TxHandle};
use tracing::{info, warn};
use undolog_pmem::{Heap, PAddr, PersistentMemory};

/// The transaction engine for one persistent region.
///
/// The engine owns the heap, the transaction header and the two handle
/// pools. It is constructed once at startup and shared by reference with
/// every thread that runs transactions.
///
/// # Example
///
/// ```rust
/// use undolog_core::{Engine, EngineConfig};
/// use undolog_pmem::{Heap, InMemoryRegion, PAddr, PersistentMemory};
///
/// let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
/// let engine = Engine::open(heap, EngineConfig::new().pool_size(4)).unwrap();
///
/// let x = engine.heap().alloc_value(10u64).unwrap();
/// let mut tx = engine.acquire().unwrap();
/// tx.begin();
/// tx.log_set(x, 99).unwrap();
///
/// // The process dies before `end`, after the cache wrote everything back.
/// engine.heap().memory().flush(PAddr::new(0), 1 << 20).unwrap();
/// std::mem::forget(tx);
/// let crashed = engine.into_heap().into_memory().crash();
///
/// let engine = Engine::open(Heap::open(crashed).unwrap(), EngineConfig::new()).unwrap();
/// assert_eq!(engine.heap().memory().load(x).unwrap(), 10);
/// ```
pub struct Engine<M: PersistentMemory> {
    heap: Heap<M>,
    header: TxHeader,
    small: HandlePool,
    large: HandlePool,
    config: EngineConfig,
    stats: EngineStats,
    recovery: Option<RecoverySummary>,
}

impl<M: PersistentMemory> Engine<M> {
    /// Builds or recovers the engine rooted at `root`.
    ///
    /// A null `root` creates a new transaction header. Otherwise the header at
    /// `root` is checked and every handle is recovered before the engine is
    /// returned. Store [`header_addr`](Self::header_addr) in the application
    /// root afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityFatal`] if the header or a handle is
    /// corrupt. The region must not be used further in that case.
    pub fn initialize(heap: Heap<M>, root: PAddr, config: EngineConfig) -> CoreResult<Self> {
        config.validate()?;
        let stats = EngineStats::new();

        let (header, recovery) = if root.is_null() {
            let header = TxHeader::create(&heap, &config)?;
            info!(
                header = %header.addr(),
                small = config.pool_size,
                large = config.large_pool_size,
                "created transaction header"
            );
            (header, None)
        } else {
            let header = TxHeader::open(heap.memory(), root, config.magic)?;
            let summary = recovery::recover(&heap, &header, &stats)?;
            (header, Some(summary))
        };

        let small_size = header.records(PoolClass::Small).len();
        let large_size = header.records(PoolClass::Large).len();
        if small_size != config.pool_size || large_size != config.large_pool_size {
            warn!(
                stored_small = small_size,
                stored_large = large_size,
                configured_small = config.pool_size,
                configured_large = config.large_pool_size,
                "pool sizes differ from configuration; using stored sizes"
            );
        }

        Ok(Self {
            heap,
            header,
            small: HandlePool::new(small_size),
            large: HandlePool::new(large_size),
            config,
            stats,
            recovery,
        })
    }

    /// Builds or recovers the engine rooted at the heap's application root.
    ///
    /// On first use the new header address is stored in the root slot.
    ///
    /// # Errors
    ///
    /// Same as [`initialize`](Self::initialize).
    pub fn open(heap: Heap<M>, config: EngineConfig) -> CoreResult<Self> {
        let root = heap.root()?;
        let engine = Self::initialize(heap, root, config)?;
        if root.is_null() {
            engine.heap.set_root(engine.header_addr())?;
        }
        Ok(engine)
    }

    /// Address of the transaction header.
    pub fn header_addr(&self) -> PAddr {
        self.header.addr()
    }

    /// The transaction header.
    pub fn header(&self) -> &TxHeader {
        &self.header
    }

    /// The persistent heap.
    pub fn heap(&self) -> &Heap<M> {
        &self.heap
    }

    /// Consumes the engine and returns the heap.
    pub fn into_heap(self) -> Heap<M> {
        self.heap
    }

    /// The configuration the engine was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// What recovery did at startup, or `None` for a new header.
    pub fn recovery(&self) -> Option<RecoverySummary> {
        self.recovery
    }

    /// Checks out a small handle, blocking until one is free.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityFatal`] if the handle's persistent state
    /// is corrupt.
    pub fn acquire(&self) -> CoreResult<TxHandle<'_, M>> {
        let index = self.small.acquire();
        self.checkout(PoolClass::Small, index)
    }

    /// Checks out a small handle if one is free.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> CoreResult<Option<TxHandle<'_, M>>> {
        match self.small.try_acquire() {
            Some(index) => self.checkout(PoolClass::Small, index).map(Some),
            None => Ok(None),
        }
    }

    /// Checks out a large handle, blocking until one is free.
    ///
    /// Large handles start with a bigger log and suit transactions that
    /// touch many locations.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the large pool is empty.
    pub fn acquire_large(&self) -> CoreResult<TxHandle<'_, M>> {
        if self.large.size() == 0 {
            return Err(CoreError::validation("large handle pool is empty"));
        }
        let index = self.large.acquire();
        self.checkout(PoolClass::Large, index)
    }

    /// Rolls back any open transaction on `handle` and returns it to its pool.
    ///
    /// Dropping a handle does the same but can only log failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails. The handle is returned to
    /// the pool regardless.
    pub fn release(&self, mut handle: TxHandle<'_, M>) -> CoreResult<()> {
        handle.finish()
    }

    /// Number of handles currently checked out across both pools.
    pub fn handles_in_use(&self) -> usize {
        self.small.in_use() + self.large.in_use()
    }

    pub(crate) fn pool(&self, class: PoolClass) -> &HandlePool {
        match class {
            PoolClass::Small => &self.small,
            PoolClass::Large => &self.large,
        }
    }

    fn checkout(&self, class: PoolClass, index: usize) -> CoreResult<TxHandle<'_, M>> {
        let record = self.header.records(class)[index];
        match TxHandle::attach(self, class, index, record) {
            Ok(handle) => {
                self.stats.record_acquire();
                Ok(handle)
            }
            Err(e) => {
                self.pool(class).release(index);
                Err(e)
            }
        }
    }
}

impl<M: PersistentMemory> std::fmt::Debug for Engine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("header", &self.header.addr())
            .field("small", &self.small.size())
            .field("large", &self.large.size())
            .field("in_use", &self.handles_in_use())
            .finish()
    }
}
