//! Persistent memory region trait definition.

use crate::error::{PmemError, PmemResult};
use crate::ptr::{PAddr, PPtr, Persist};

/// First byte of the heap area. Everything below is region metadata.
pub const HEAP_START: u64 = 64;

/// A byte-addressable region whose flushed contents survive a crash.
///
/// The region exposes exactly two durability primitives: [`flush`] pushes a
/// range to durable media and [`fence`] orders every earlier flush before
/// any later store. Plain [`write`]s are only guaranteed durable once a
/// flush covering them has been fenced.
///
/// # Invariants
///
/// - `read` returns the most recent `write` to each byte, flushed or not
/// - after a crash, a byte holds its value as of its last completed `flush`
/// - regions are `Send + Sync`; disjoint ranges may be used from many threads
///
/// # Implementors
///
/// - [`super::InMemoryRegion`] - For testing and crash simulation
/// - [`super::FileRegion`] - Backed by a file on durable storage
///
/// [`flush`]: PersistentMemory::flush
/// [`fence`]: PersistentMemory::fence
/// [`write`]: PersistentMemory::write
pub trait PersistentMemory: Send + Sync {
    /// Reads `len` bytes starting at `addr` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfBounds`] if the range leaves the region.
    fn read(&self, addr: PAddr, len: usize) -> PmemResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(addr, &mut buf)?;
        Ok(buf)
    }

    /// Reads `buf.len()` bytes starting at `addr` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfBounds`] if the range leaves the region.
    fn read_into(&self, addr: PAddr, buf: &mut [u8]) -> PmemResult<()>;

    /// Stores `data` at `addr`. The store is not durable until flushed.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfBounds`] if the range leaves the region.
    fn write(&self, addr: PAddr, data: &[u8]) -> PmemResult<()>;

    /// Copies `len` bytes from `src` to `dst` inside the region.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfBounds`] if either range leaves the region.
    fn copy(&self, src: PAddr, dst: PAddr, len: usize) -> PmemResult<()> {
        let data = self.read(src, len)?;
        self.write(dst, &data)
    }

    /// Pushes `len` bytes starting at `addr` to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the range leaves the region or the media fails.
    fn flush(&self, addr: PAddr, len: usize) -> PmemResult<()>;

    /// Orders all previous flushes before any subsequent store.
    ///
    /// # Errors
    ///
    /// Returns an error if the media fails to acknowledge earlier flushes.
    fn fence(&self) -> PmemResult<()>;

    /// Returns the region size in bytes.
    fn size(&self) -> u64;

    /// Returns true if `[addr, addr + len)` lies inside the heap area.
    ///
    /// Region metadata below [`HEAP_START`] is not a valid target.
    fn contains(&self, addr: PAddr, len: usize) -> bool {
        let start = addr.as_u64();
        match start.checked_add(len as u64) {
            Some(end) => start >= HEAP_START && end <= self.size(),
            None => false,
        }
    }

    /// Reads a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfBounds`] if the value leaves the region.
    fn load<T: Persist>(&self, ptr: PPtr<T>) -> PmemResult<T>
    where
        Self: Sized,
    {
        let bytes = self.read(ptr.addr(), T::SIZE)?;
        Ok(T::decode(&bytes))
    }

    /// Stores a typed value. The store is not durable until flushed.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfBounds`] if the value leaves the region.
    fn store<T: Persist>(&self, ptr: PPtr<T>, value: T) -> PmemResult<()>
    where
        Self: Sized,
    {
        self.write(ptr.addr(), &value.to_bytes())
    }

    /// Stores a typed value, flushes it and fences.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or either primitive fails.
    fn persist<T: Persist>(&self, ptr: PPtr<T>, value: T) -> PmemResult<()>
    where
        Self: Sized,
    {
        self.store(ptr, value)?;
        self.flush(ptr.addr(), T::SIZE)?;
        self.fence()
    }
}

/// Checks a range against a region size, shared by the region implementations.
pub(crate) fn check_range(addr: PAddr, len: usize, size: u64) -> PmemResult<std::ops::Range<usize>> {
    let start = addr.as_u64();
    match start.checked_add(len as u64) {
        Some(end) if end <= size => Ok(start as usize..end as usize),
        _ => Err(PmemError::OutOfBounds {
            addr: start,
            len,
            size,
        }),
    }
}

impl<M: PersistentMemory + ?Sized> PersistentMemory for std::sync::Arc<M> {
    fn read_into(&self, addr: PAddr, buf: &mut [u8]) -> PmemResult<()> {
        (**self).read_into(addr, buf)
    }

    fn write(&self, addr: PAddr, data: &[u8]) -> PmemResult<()> {
        (**self).write(addr, data)
    }

    fn copy(&self, src: PAddr, dst: PAddr, len: usize) -> PmemResult<()> {
        (**self).copy(src, dst, len)
    }

    fn flush(&self, addr: PAddr, len: usize) -> PmemResult<()> {
        (**self).flush(addr, len)
    }

    fn fence(&self) -> PmemResult<()> {
        (**self).fence()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}
