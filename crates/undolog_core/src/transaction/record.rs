//! Undo recording and in-place reads.

use crate::error::{CoreError, CoreResult};
use crate::header::HandleRecord;
use crate::log::LogEntry;
use crate::transaction::handle::TxHandle;
use tracing::{debug, warn};
use undolog_pmem::{span, PAddr, PPtr, PSlice, PVec, Persist, PersistentMemory};

/// Where a logged value lives.
///
/// Only persistent targets get an undo record. A volatile target is
/// assigned directly and reported with [`CoreError::VolatileTarget`].
#[derive(Debug)]
pub enum Target<'a, T> {
    /// A value in the persistent region.
    Persistent(PPtr<T>),
    /// A value in ordinary process memory.
    Volatile(&'a mut T),
}

impl<T> From<PPtr<T>> for Target<'_, T> {
    fn from(ptr: PPtr<T>) -> Self {
        Self::Persistent(ptr)
    }
}

impl<'a, T> From<&'a mut T> for Target<'a, T> {
    fn from(value: &'a mut T) -> Self {
        Self::Volatile(value)
    }
}

impl<M: PersistentMemory> TxHandle<'_, M> {
    /// Records the current value of `target` so it can be rolled back.
    ///
    /// The caller may overwrite the target in place once this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VolatileTarget`] for volatile targets and
    /// [`CoreError::Validation`] for persistent pointers outside the heap.
    pub fn log<'a, T: Persist + 'a>(&mut self, target: impl Into<Target<'a, T>>) -> CoreResult<()> {
        match target.into() {
            Target::Persistent(ptr) => {
                self.record_undo(ptr.addr(), T::SIZE)?;
                Ok(())
            }
            Target::Volatile(_) => Err(self.volatile(T::SIZE)),
        }
    }

    /// Records the current value of `target`, then assigns `value` to it.
    ///
    /// The assignment happens only after the undo record is durable, so the
    /// mutation can always be rolled back. Volatile targets are assigned
    /// directly.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log). On [`CoreError::VolatileTarget`] the
    /// assignment has still been performed.
    pub fn log_set<'a, T: Persist + 'a>(
        &mut self,
        target: impl Into<Target<'a, T>>,
        value: T,
    ) -> CoreResult<()> {
        match target.into() {
            Target::Persistent(ptr) => {
                self.record_undo(ptr.addr(), T::SIZE)?;
                self.engine.heap().memory().store(ptr, value)?;
                Ok(())
            }
            Target::Volatile(slot) => {
                *slot = value;
                Err(self.volatile(T::SIZE))
            }
        }
    }

    /// Records a vector header and the contents it points to.
    ///
    /// Both the header and the contents can then be changed, including
    /// pointing the header at a new backing array. At commit the header is
    /// flushed together with whatever contents it points to by then.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the header or its contents lie
    /// outside the heap.
    pub fn log_vec<T: Persist>(&mut self, vec: PPtr<PVec<T>>) -> CoreResult<()> {
        let header = self.engine.heap().memory().load(vec)?;
        let contents = self.contents_len(header.data(), header.len(), header.byte_len())?;
        let index = self.record_undo(vec.addr(), PVec::<T>::SIZE)?;
        self.vec_headers.push((index, T::SIZE));

        if contents > 0 {
            let contents = self.record_undo(header.data(), contents)?;
            self.skip_flush.push(contents);
        }
        Ok(())
    }

    /// Records the elements of a bare slice. An empty slice records nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the slice lies outside the heap.
    pub fn log_slice<T: Persist>(&mut self, slice: PSlice<T>) -> CoreResult<()> {
        if slice.is_empty() {
            return Ok(());
        }
        let len = self.contents_len(slice.data(), slice.len(), slice.byte_len())?;
        self.record_undo(slice.data(), len)?;
        Ok(())
    }

    /// Checks that `count` elements spanning `bytes` at `data` lie in the heap.
    fn contents_len(&self, data: PAddr, count: u64, bytes: Option<usize>) -> CoreResult<usize> {
        match bytes {
            Some(0) => Ok(0),
            Some(len) if self.engine.heap().memory().contains(data, len) => Ok(len),
            _ => Err(CoreError::validation(format!(
                "{count} elements at {data} outside persistent heap"
            ))),
        }
    }

    /// Records `len` raw bytes at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `len` is 0 or the range lies
    /// outside the heap.
    pub fn log_range(&mut self, addr: PAddr, len: usize) -> CoreResult<()> {
        self.record_undo(addr, len)?;
        Ok(())
    }

    /// Records the bytes at `dst`, then overwrites them with `src`.
    ///
    /// # Errors
    ///
    /// Same as [`log_range`](Self::log_range).
    pub fn log_copy(&mut self, dst: PAddr, src: &[u8]) -> CoreResult<()> {
        self.record_undo(dst, src.len())?;
        self.engine.heap().memory().write(dst, src)?;
        Ok(())
    }

    /// Reads the current value at `ptr`.
    ///
    /// Updates are made in place, so this never consults the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the value lies outside the region.
    pub fn read<T: Persist>(&self, ptr: PPtr<T>) -> CoreResult<T> {
        Ok(self.engine.heap().memory().load(ptr)?)
    }

    /// Reads element `index` of the vector at `vec`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `index` is out of range.
    pub fn read_at<T: Persist>(&self, vec: PPtr<PVec<T>>, index: u64) -> CoreResult<T> {
        let memory = self.engine.heap().memory();
        let header = memory.load(vec)?;
        let element = header.element(index).ok_or_else(|| {
            CoreError::validation(format!(
                "index {index} out of range for vector of length {}",
                header.len()
            ))
        })?;
        Ok(memory.load(element)?)
    }

    /// Reads elements `start..end` of the vector at `vec`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the range is inverted or out of range.
    pub fn read_range<T: Persist>(
        &self,
        vec: PPtr<PVec<T>>,
        start: u64,
        end: u64,
    ) -> CoreResult<Vec<T>> {
        let memory = self.engine.heap().memory();
        let header = memory.load(vec)?;
        if start > end || end > header.len() {
            return Err(CoreError::validation(format!(
                "range {start}..{end} out of range for vector of length {}",
                header.len()
            )));
        }

        let count = end - start;
        if count == 0 {
            return Ok(Vec::new());
        }
        let first = header.element(start).map_or(header.data(), |ptr| ptr.addr());
        let bytes = span(count, T::SIZE).filter(|&bytes| memory.contains(first, bytes));
        let Some(bytes) = bytes else {
            return Err(CoreError::validation(format!(
                "range {start}..{end} lies outside persistent heap"
            )));
        };

        let mut values = Vec::with_capacity(bytes / T::SIZE.max(1));
        for index in start..end {
            if let Some(element) = header.element(index) {
                values.push(memory.load(element)?);
            }
        }
        Ok(values)
    }

    /// Appends one undo entry for `[addr, addr + len)` and returns its index.
    ///
    /// Order matters here. The backup and the entry (still tagged empty) are
    /// flushed and fenced before the generation is set, and the tail only
    /// moves once the tagged entry is durable.
    pub(super) fn record_undo(&mut self, addr: PAddr, len: usize) -> CoreResult<usize> {
        let engine = self.engine;
        let heap = engine.heap();
        let memory = heap.memory();

        if len == 0 {
            return Err(CoreError::validation("cannot log an empty range"));
        }
        if !memory.contains(addr, len) {
            return Err(CoreError::validation(format!(
                "log target {addr}+{len} outside persistent heap"
            )));
        }

        if self.tail == self.log.capacity() {
            self.grow()?;
        }

        let backup = heap.alloc(len)?;
        memory.copy(addr, backup, len)?;

        let index = self.tail;
        let entry = LogEntry {
            original: addr,
            backup,
            size: len as u64,
            generation: 0,
        };
        self.log.write(memory, index, entry)?;
        memory.flush(backup, len)?;
        self.log.flush_entries(memory, index, 1)?;
        memory.fence()?;

        self.log.write_generation(memory, index, self.epoch)?;
        self.log.flush_entries(memory, index, 1)?;
        self.update_tail(index + 1)?;

        engine.stats().record_logged(len);
        Ok(index)
    }

    /// Doubles the log and switches the handle over to the new array.
    fn grow(&mut self) -> CoreResult<()> {
        let engine = self.engine;
        let heap = engine.heap();

        let grown = self.log.grow(heap)?;
        heap.memory()
            .persist(HandleRecord::log_slot(self.record), grown.addr())?;
        heap.free(self.log.addr())?;

        debug!(
            pool = %self.class,
            handle = self.index,
            from = self.log.capacity(),
            to = grown.capacity(),
            "grew undo log"
        );
        self.log = grown;
        engine.stats().record_growth();
        Ok(())
    }

    fn volatile(&self, size: usize) -> CoreError {
        self.engine.stats().record_volatile_target();
        warn!(size, "log target is volatile, assigned without undo record");
        CoreError::VolatileTarget { size }
    }
}
