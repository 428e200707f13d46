//! Transaction handle lifecycle.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::header::{next_epoch, HandleRecord, PoolClass};
use crate::log::{LogArray, LogEntry};
use crate::transaction::locks::LockSet;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error};
use undolog_pmem::{span, Heap, PAddr, PPtr, PersistentMemory};

/// A checked-out unit of transactional work.
///
/// A handle owns one undo log. Its volatile state (cursor, nesting level,
/// deferred flushes, held locks) belongs to the thread that acquired it.
/// Dropping the handle releases it: any open transaction is rolled back and
/// the handle goes back to its pool.
///
/// # Example
///
/// ```rust
/// use undolog_core::{Engine, EngineConfig};
/// use undolog_pmem::{Heap, InMemoryRegion, PersistentMemory};
///
/// let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
/// let engine = Engine::open(heap, EngineConfig::new().pool_size(2)).unwrap();
/// let balance = engine.heap().alloc_value(100u64).unwrap();
///
/// let mut tx = engine.acquire().unwrap();
/// tx.begin();
/// tx.log_set(balance, 75).unwrap();
/// assert!(tx.end().unwrap());
///
/// assert_eq!(engine.heap().memory().load(balance).unwrap(), 75);
/// ```
pub struct TxHandle<'e, M: PersistentMemory> {
    pub(super) engine: &'e Engine<M>,
    pub(super) class: PoolClass,
    pub(super) index: usize,
    pub(super) record: PAddr,
    pub(super) log: LogArray,
    pub(super) epoch: u64,
    pub(super) tail: usize,
    pub(super) level: usize,
    /// Entries whose commit-time flush is covered by a paired header entry.
    /// Ascending, since entries are only ever appended.
    pub(super) skip_flush: Vec<usize>,
    /// Entries backing a vector header, with the element size. Ascending.
    pub(super) vec_headers: Vec<(usize, usize)>,
    pub(super) locks: LockSet,
    released: bool,
}

impl<'e, M: PersistentMemory> TxHandle<'e, M> {
    /// Binds handle `index` of pool `class` to its persistent record.
    pub(crate) fn attach(
        engine: &'e Engine<M>,
        class: PoolClass,
        index: usize,
        record: PAddr,
    ) -> CoreResult<Self> {
        let memory = engine.heap().memory();
        let durable = HandleRecord::load(memory, record)?;
        let log = LogArray::open(memory, durable.log)?;
        let tail = durable.tail as usize;
        if tail > log.capacity() {
            return Err(CoreError::integrity(format!(
                "handle {class}/{index} tail {tail} exceeds log capacity {}",
                log.capacity()
            )));
        }

        Ok(Self {
            engine,
            class,
            index,
            record,
            log,
            epoch: durable.epoch,
            tail,
            level: 0,
            skip_flush: Vec::new(),
            vec_headers: Vec::new(),
            locks: LockSet::default(),
            released: false,
        })
    }

    /// Pool this handle was checked out from.
    pub fn class(&self) -> PoolClass {
        self.class
    }

    /// Index of this handle within its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current nesting level; 0 means idle.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Returns true if no transaction is open.
    pub fn is_idle(&self) -> bool {
        self.level == 0
    }

    /// Number of undo entries recorded in the open transaction.
    pub fn logged(&self) -> usize {
        self.tail
    }

    /// Current log capacity in entries.
    pub fn capacity(&self) -> usize {
        self.log.capacity()
    }

    /// Number of locks held through this handle.
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    /// Opens a transaction level.
    ///
    /// Only the outermost level commits; nested levels are flattened into it.
    pub fn begin(&mut self) {
        self.level += 1;
        if self.level == 1 {
            self.engine.stats().record_begin();
        }
    }

    /// Closes a transaction level.
    ///
    /// Closing the outermost level commits: every logged location is flushed,
    /// held locks are released and the log is cleared. Returns true when the
    /// handle is idle afterwards and safe to release. Calling this on an idle
    /// handle does nothing and returns true.
    ///
    /// # Errors
    ///
    /// Returns an error if a durability primitive fails during commit.
    pub fn end(&mut self) -> CoreResult<bool> {
        match self.level {
            0 => Ok(true),
            1 => {
                self.level = 0;
                self.commit()?;
                Ok(true)
            }
            _ => {
                self.level -= 1;
                Ok(false)
            }
        }
    }

    /// Takes a shared lock for the rest of the transaction.
    ///
    /// The lock is released at the outermost [`end`](Self::end) or on abort.
    /// No deadlock avoidance is performed; callers order their locks.
    pub fn rlock<T: 'static>(&mut self, lock: &Arc<RwLock<T>>) {
        self.locks.read(lock);
    }

    /// Takes an exclusive lock for the rest of the transaction.
    pub fn wlock<T: 'static>(&mut self, lock: &Arc<RwLock<T>>) {
        self.locks.write(lock);
    }

    /// Alias of [`wlock`](Self::wlock).
    pub fn lock<T: 'static>(&mut self, lock: &Arc<RwLock<T>>) {
        self.wlock(lock);
    }

    fn commit(&mut self) -> CoreResult<()> {
        if self.tail == 0 {
            self.locks.release();
            self.clear_volatile();
            self.engine.stats().record_commit();
            return Ok(());
        }

        let engine = self.engine;
        let memory = engine.heap().memory();
        let mut skipped = self.skip_flush.iter().copied().peekable();
        let mut headers = self.vec_headers.iter().copied().peekable();
        for index in 0..self.tail {
            if skipped.next_if_eq(&index).is_some() {
                continue;
            }
            let entry = self.log.read(memory, index)?;
            memory.flush(entry.original, entry.size as usize)?;

            if let Some((_, element_size)) = headers.next_if(|&(header, _)| header == index) {
                let data = memory.load(PPtr::<PAddr>::new(entry.original))?;
                let len = memory.load(PPtr::<u64>::new(entry.original.add(8)))?;
                // A header repointed past the heap has no contents to flush.
                match span(len, element_size) {
                    Some(bytes) if bytes > 0 && memory.contains(data, bytes) => {
                        memory.flush(data, bytes)?;
                    }
                    _ => {}
                }
            }
        }
        memory.fence()?;

        self.locks.release();
        let entries = self.tail;
        self.reset_log()?;
        self.engine.stats().record_commit();
        debug!(pool = %self.class, handle = self.index, entries, "committed transaction");
        Ok(())
    }

    /// Rolls back the open transaction, if any, and returns to idle.
    pub(crate) fn abort(&mut self) -> CoreResult<()> {
        let active = self.level > 0 || self.tail > 0;
        let engine = self.engine;
        let memory = engine.heap().memory();

        let mut restored = 0usize;
        if self.tail > 0 {
            for index in (0..self.tail).rev() {
                let entry = self.log.read(memory, index)?;
                if !entry.is_live(self.epoch) {
                    continue;
                }
                let size = entry.size as usize;
                memory.copy(entry.backup, entry.original, size)?;
                memory.flush(entry.original, size)?;
                restored += 1;
            }
            memory.fence()?;
        }

        self.locks.release();
        self.level = 0;
        if self.tail > 0 {
            self.reset_log()?;
        } else {
            self.clear_volatile();
        }

        if active {
            self.engine.stats().record_abort();
            debug!(pool = %self.class, handle = self.index, restored, "rolled back transaction");
        }
        Ok(())
    }

    /// Ends the current log cycle.
    ///
    /// The durable epoch bump is the commit point: once it lands, every
    /// entry of the finished cycle is stale and recovery ignores it.
    fn reset_log(&mut self) -> CoreResult<()> {
        let engine = self.engine;
        let heap: &Heap<M> = engine.heap();
        let memory = heap.memory();

        let next = next_epoch(self.epoch);
        memory.persist(HandleRecord::epoch_slot(self.record), next)?;
        self.epoch = next;

        let mut backups = Vec::with_capacity(self.tail);
        for index in 0..self.tail {
            let entry = self.log.read(memory, index)?;
            if !entry.backup.is_null() {
                backups.push(entry.backup);
            }
            self.log.write(memory, index, LogEntry::EMPTY)?;
        }
        self.log.flush_entries(memory, 0, self.tail)?;
        memory.fence()?;
        self.update_tail(0)?;

        for backup in backups {
            heap.free(backup)?;
        }
        self.clear_volatile();
        Ok(())
    }

    /// Durably moves the write cursor.
    pub(super) fn update_tail(&mut self, tail: usize) -> CoreResult<()> {
        let engine = self.engine;
        let memory = engine.heap().memory();
        memory.fence()?;
        memory.store(HandleRecord::tail_slot(self.record), tail as u64)?;
        memory.flush(HandleRecord::tail_slot(self.record).addr(), 8)?;
        memory.fence()?;
        self.tail = tail;
        Ok(())
    }

    fn clear_volatile(&mut self) {
        self.skip_flush.clear();
        self.vec_headers.clear();
    }

    /// Aborts and returns the handle to its pool. Runs at most once.
    pub(crate) fn finish(&mut self) -> CoreResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = self.abort();
        self.engine.pool(self.class).release(self.index);
        result
    }
}

impl<M: PersistentMemory> Drop for TxHandle<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(pool = %self.class, handle = self.index, error = %e, "failed to roll back released handle");
        }
    }
}

impl<M: PersistentMemory> std::fmt::Debug for TxHandle<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle")
            .field("class", &self.class)
            .field("index", &self.index)
            .field("epoch", &self.epoch)
            .field("tail", &self.tail)
            .field("level", &self.level)
            .field("locks", &self.locks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, EngineConfig};
    use parking_lot::RwLock;
    use std::sync::Arc;
    use undolog_pmem::{Heap, InMemoryRegion, PPtr, PVec, PersistentMemory};

    fn engine() -> Engine<InMemoryRegion> {
        let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
        let config = EngineConfig::new()
            .pool_size(2)
            .initial_log_capacity(4)
            .large_pool_size(1)
            .large_log_capacity(16);
        Engine::open(heap, config).unwrap()
    }

    #[test]
    fn nesting_levels() {
        let engine = engine();
        let mut tx = engine.acquire().unwrap();
        assert!(tx.is_idle());

        tx.begin();
        tx.begin();
        assert_eq!(tx.level(), 2);
        assert!(!tx.end().unwrap());
        assert_eq!(tx.level(), 1);
        assert!(tx.end().unwrap());
        assert!(tx.is_idle());
    }

    #[test]
    fn end_while_idle_is_noop() {
        let engine = engine();
        let mut tx = engine.acquire().unwrap();
        assert!(tx.end().unwrap());
        assert!(tx.end().unwrap());
        assert_eq!(engine.stats().transactions_committed(), 0);
    }

    #[test]
    fn commit_clears_log_and_advances_epoch() {
        let engine = engine();
        let x = engine.heap().alloc_value(1u64).unwrap();
        let mut tx = engine.acquire().unwrap();
        let epoch = tx.epoch;

        tx.begin();
        tx.log_set(x, 2).unwrap();
        assert_eq!(tx.logged(), 1);
        tx.end().unwrap();

        assert_eq!(tx.logged(), 0);
        assert_eq!(tx.epoch, epoch + 1);
        let entry = tx.log.read(engine.heap().memory(), 0).unwrap();
        assert!(entry.is_empty());
    }

    #[test]
    fn commit_survives_header_repointed_past_heap() {
        let engine = engine();
        let heap = engine.heap();
        let data = heap.alloc_array::<u64>(2).unwrap();
        let vec = heap.alloc_value(PVec::<u64>::new(data, 2, 2)).unwrap();

        let mut tx = engine.acquire().unwrap();
        tx.begin();
        tx.log_vec(vec).unwrap();
        let bogus = PVec::<u64>::new(data, u64::MAX / 4, u64::MAX / 4);
        heap.memory().store(vec, bogus).unwrap();
        assert!(tx.end().unwrap());

        assert_eq!(tx.logged(), 0);
        assert_eq!(heap.memory().crash().load(vec).unwrap(), bogus);
    }

    #[test]
    fn commit_walks_interleaved_vectors_and_scalars() {
        let engine = engine();
        let heap = engine.heap();
        let mut vecs = Vec::new();
        let mut scalars = Vec::new();
        for i in 0..6u64 {
            let data = heap.alloc_array::<u64>(2).unwrap();
            vecs.push(heap.alloc_value(PVec::<u64>::new(data, 2, 2)).unwrap());
            scalars.push(heap.alloc_value(i).unwrap());
        }

        let mut tx = engine.acquire_large().unwrap();
        tx.begin();
        for (vec, scalar) in vecs.iter().zip(&scalars) {
            tx.log_vec(*vec).unwrap();
            tx.log_set(*scalar, 100).unwrap();
        }
        let headers: Vec<_> = tx.vec_headers.iter().map(|(index, _)| *index).collect();
        assert_eq!(headers, vec![0, 3, 6, 9, 12, 15]);
        assert_eq!(tx.skip_flush, vec![1, 4, 7, 10, 13, 16]);

        let fresh: Vec<_> = vecs
            .iter()
            .map(|vec| {
                let data = heap.alloc_array::<u64>(1).unwrap();
                heap.memory().store(PPtr::<u64>::new(data), 7).unwrap();
                heap.memory().store(*vec, PVec::new(data, 1, 1)).unwrap();
                data
            })
            .collect();
        assert!(tx.end().unwrap());

        let durable = heap.memory().crash();
        for ((vec, scalar), data) in vecs.iter().zip(&scalars).zip(&fresh) {
            assert_eq!(durable.load(*vec).unwrap(), PVec::new(*data, 1, 1));
            assert_eq!(durable.load(PPtr::<u64>::new(*data)).unwrap(), 7);
            assert_eq!(durable.load(*scalar).unwrap(), 100);
        }
    }

    #[test]
    fn drop_rolls_back_open_transaction() {
        let engine = engine();
        let x = engine.heap().alloc_value(10u64).unwrap();

        {
            let mut tx = engine.acquire().unwrap();
            tx.begin();
            tx.log_set(x, 99).unwrap();
            assert_eq!(engine.heap().memory().load(x).unwrap(), 99);
        }

        assert_eq!(engine.heap().memory().load(x).unwrap(), 10);
        assert_eq!(engine.stats().transactions_aborted(), 1);
        assert_eq!(engine.handles_in_use(), 0);
    }

    #[test]
    fn abort_releases_locks() {
        let engine = engine();
        let lock = Arc::new(RwLock::new(()));

        let mut tx = engine.acquire().unwrap();
        tx.begin();
        tx.lock(&lock);
        assert!(lock.try_read().is_none());
        engine.release(tx).unwrap();
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn inner_end_keeps_locks() {
        let engine = engine();
        let lock = Arc::new(RwLock::new(()));
        let mut tx = engine.acquire().unwrap();

        tx.begin();
        tx.begin();
        tx.rlock(&lock);
        tx.end().unwrap();
        assert_eq!(tx.held_locks(), 1);
        assert!(lock.try_write().is_none());

        tx.end().unwrap();
        assert_eq!(tx.held_locks(), 0);
        assert!(lock.try_write().is_some());
    }
}
