//! In-memory persistent region for testing and crash simulation.

use crate::error::PmemResult;
use crate::ptr::PAddr;
use crate::region::{check_range, PersistentMemory};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

/// An in-memory persistent region.
///
/// The region keeps two images: the working image every read and write
/// sees, and the durable image that only changes on [`flush`]. [`crash`]
/// throws the working image away and returns a region rebuilt from the
/// durable image, which is exactly what survives a power loss.
///
/// This region is suitable for:
/// - Unit tests
/// - Crash recovery tests
/// - Ephemeral engines that don't need persistence
///
/// # Example
///
/// ```rust
/// use undolog_pmem::{InMemoryRegion, PAddr, PersistentMemory};
///
/// let region = InMemoryRegion::new(4096);
/// region.write(PAddr::new(64), b"kept").unwrap();
/// region.flush(PAddr::new(64), 4).unwrap();
/// region.write(PAddr::new(128), b"lost").unwrap();
///
/// let after = region.crash();
/// assert_eq!(after.read(PAddr::new(64), 4).unwrap(), b"kept");
/// assert_eq!(after.read(PAddr::new(128), 4).unwrap(), vec![0; 4]);
/// ```
///
/// [`flush`]: PersistentMemory::flush
/// [`crash`]: InMemoryRegion::crash
#[derive(Debug)]
pub struct InMemoryRegion {
    working: RwLock<Vec<u8>>,
    durable: Mutex<Vec<u8>>,
    flushes: AtomicU64,
    flushed_bytes: AtomicU64,
    fences: AtomicU64,
}

impl InMemoryRegion {
    /// Creates a zeroed region of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self::from_image(vec![0u8; size])
    }

    /// Creates a region whose working and durable images both start as `image`.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            working: RwLock::new(image.clone()),
            durable: Mutex::new(image),
            flushes: AtomicU64::new(0),
            flushed_bytes: AtomicU64::new(0),
            fences: AtomicU64::new(0),
        }
    }

    /// Simulates a crash: returns a region holding only flushed data.
    #[must_use]
    pub fn crash(&self) -> Self {
        Self::from_image(self.durable_image())
    }

    /// Returns a copy of the durable image.
    #[must_use]
    pub fn durable_image(&self) -> Vec<u8> {
        self.durable.lock().clone()
    }

    /// Returns a copy of the working image.
    #[must_use]
    pub fn working_image(&self) -> Vec<u8> {
        self.working.read().clone()
    }

    /// Number of flush calls since creation or the last reset.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Number of bytes flushed since creation or the last reset.
    #[must_use]
    pub fn flushed_bytes(&self) -> u64 {
        self.flushed_bytes.load(Ordering::Relaxed)
    }

    /// Number of fence calls since creation or the last reset.
    #[must_use]
    pub fn fence_count(&self) -> u64 {
        self.fences.load(Ordering::Relaxed)
    }

    /// Resets the flush and fence counters.
    pub fn reset_counters(&self) {
        self.flushes.store(0, Ordering::Relaxed);
        self.flushed_bytes.store(0, Ordering::Relaxed);
        self.fences.store(0, Ordering::Relaxed);
    }
}

impl PersistentMemory for InMemoryRegion {
    fn read_into(&self, addr: PAddr, buf: &mut [u8]) -> PmemResult<()> {
        let data = self.working.read();
        let range = check_range(addr, buf.len(), data.len() as u64)?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write(&self, addr: PAddr, bytes: &[u8]) -> PmemResult<()> {
        let mut data = self.working.write();
        let range = check_range(addr, bytes.len(), data.len() as u64)?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn copy(&self, src: PAddr, dst: PAddr, len: usize) -> PmemResult<()> {
        let mut data = self.working.write();
        let size = data.len() as u64;
        let from = check_range(src, len, size)?;
        let to = check_range(dst, len, size)?;
        data.copy_within(from, to.start);
        Ok(())
    }

    fn flush(&self, addr: PAddr, len: usize) -> PmemResult<()> {
        let working = self.working.read();
        let range = check_range(addr, len, working.len() as u64)?;
        self.durable.lock()[range.clone()].copy_from_slice(&working[range]);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_bytes.fetch_add(len as u64, Ordering::Relaxed);
        Ok(())
    }

    fn fence(&self) -> PmemResult<()> {
        // Flushes are applied synchronously, so ordering already holds
        self.fences.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.working.read().len() as u64
    }
}
