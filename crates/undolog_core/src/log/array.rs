//! Log backing arrays.

use crate::error::{CoreError, CoreResult};
use crate::log::entry::{LogEntry, ENTRY_SIZE};
use undolog_pmem::{Heap, PAddr, PPtr, PersistentMemory};

/// Size of the capacity word at the start of an array.
const CAPACITY_SIZE: u64 = 8;

/// A log backing array in the persistent heap.
///
/// The capacity is stored inside the array, so switching a handle to a new
/// array is a single pointer store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogArray {
    addr: PAddr,
    capacity: usize,
}

impl LogArray {
    /// Allocates a zeroed array of `capacity` entries and durably records its capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the heap cannot satisfy the allocation.
    pub fn alloc<M: PersistentMemory>(heap: &Heap<M>, capacity: usize) -> CoreResult<Self> {
        let addr = heap.alloc(Self::byte_size(capacity))?;
        heap.memory()
            .persist(PPtr::<u64>::new(addr), capacity as u64)?;
        Ok(Self { addr, capacity })
    }

    /// Opens the array at `addr`, checking that it fits in the region.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityFatal`] if the array is out of bounds.
    pub fn open<M: PersistentMemory>(memory: &M, addr: PAddr) -> CoreResult<Self> {
        if !memory.contains(addr, CAPACITY_SIZE as usize) {
            return Err(CoreError::integrity(format!(
                "log array {addr} outside persistent heap"
            )));
        }
        let capacity = memory.load(PPtr::<u64>::new(addr))? as usize;
        let fits = capacity
            .checked_mul(ENTRY_SIZE)
            .and_then(|bytes| bytes.checked_add(CAPACITY_SIZE as usize))
            .is_some_and(|bytes| memory.contains(addr, bytes));
        if capacity == 0 || !fits {
            return Err(CoreError::integrity(format!(
                "log array {addr} has invalid capacity {capacity}"
            )));
        }
        Ok(Self { addr, capacity })
    }

    /// Bytes needed for an array of `capacity` entries.
    #[must_use]
    pub const fn byte_size(capacity: usize) -> usize {
        CAPACITY_SIZE as usize + capacity * ENTRY_SIZE
    }

    /// Address of the array block.
    #[must_use]
    pub const fn addr(&self) -> PAddr {
        self.addr
    }

    /// Number of entry slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address of slot `index`.
    #[must_use]
    pub const fn entry_addr(&self, index: usize) -> PAddr {
        self.addr
            .add(CAPACITY_SIZE + (index * ENTRY_SIZE) as u64)
    }

    /// Reads slot `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read.
    pub fn read<M: PersistentMemory>(&self, memory: &M, index: usize) -> CoreResult<LogEntry> {
        self.check_index(index)?;
        Ok(memory.load(PPtr::new(self.entry_addr(index)))?)
    }

    /// Stores `entry` into slot `index` without flushing.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be written.
    pub fn write<M: PersistentMemory>(
        &self,
        memory: &M,
        index: usize,
        entry: LogEntry,
    ) -> CoreResult<()> {
        self.check_index(index)?;
        Ok(memory.store(PPtr::new(self.entry_addr(index)), entry)?)
    }

    /// Stores only the generation word of slot `index` without flushing.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be written.
    pub fn write_generation<M: PersistentMemory>(
        &self,
        memory: &M,
        index: usize,
        generation: u64,
    ) -> CoreResult<()> {
        self.check_index(index)?;
        let addr = self.entry_addr(index).add(24);
        Ok(memory.store(PPtr::<u64>::new(addr), generation)?)
    }

    /// Flushes `count` slots starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush_entries<M: PersistentMemory>(
        &self,
        memory: &M,
        start: usize,
        count: usize,
    ) -> CoreResult<()> {
        if count == 0 {
            return Ok(());
        }
        self.check_index(start + count - 1)?;
        Ok(memory.flush(self.entry_addr(start), count * ENTRY_SIZE)?)
    }

    /// Copies every slot into a new array of twice the capacity.
    ///
    /// The new array is durable when this returns. The caller switches the
    /// handle over to it and then frees this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation or copy fails.
    pub fn grow<M: PersistentMemory>(&self, heap: &Heap<M>) -> CoreResult<Self> {
        let grown = Self::alloc(heap, self.capacity * 2)?;
        let memory = heap.memory();
        let bytes = self.capacity * ENTRY_SIZE;

        memory.copy(self.entry_addr(0), grown.entry_addr(0), bytes)?;
        memory.flush(grown.entry_addr(0), bytes)?;
        memory.fence()?;
        Ok(grown)
    }

    /// Iterates slot indices from the highest down to 0.
    pub fn indices_backward(&self) -> impl Iterator<Item = usize> {
        (0..self.capacity).rev()
    }

    fn check_index(&self, index: usize) -> CoreResult<()> {
        if index >= self.capacity {
            return Err(CoreError::validation(format!(
                "log slot {index} beyond capacity {}",
                self.capacity
            )));
        }
        Ok(())
    }
}
