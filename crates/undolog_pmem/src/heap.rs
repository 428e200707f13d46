//! Persistent heap allocator.
//!
//! ## Region Layout
//!
//! ```text
//! | magic (8) | heap top (8) | free head (8) | root (8) | reserved (32) | blocks ... |
//! ```
//!
//! Every block starts with a 16-byte header:
//!
//! ```text
//! | payload size (8) | next free (8) | payload ... |
//! ```
//!
//! Allocation is first-fit over the free list, falling back to bumping the
//! heap top. Payloads are zeroed and flushed before they are handed out.
//! Blocks are never split or coalesced.

use crate::error::{PmemError, PmemResult};
use crate::ptr::{PAddr, PPtr, Persist};
use crate::region::{PersistentMemory, HEAP_START};
use parking_lot::Mutex;
use tracing::debug;

/// Magic bytes marking a formatted region ("UNDOPMEM").
pub const REGION_MAGIC: u64 = u64::from_le_bytes(*b"UNDOPMEM");

const MAGIC_SLOT: PPtr<u64> = PPtr::new(PAddr::new(0));
const TOP_SLOT: PPtr<u64> = PPtr::new(PAddr::new(8));
const FREE_HEAD_SLOT: PPtr<PAddr> = PPtr::new(PAddr::new(16));
const ROOT_SLOT: PPtr<PAddr> = PPtr::new(PAddr::new(24));

/// Size of the header preceding each block payload.
pub const BLOCK_HEADER_SIZE: u64 = 16;

/// An allocator handing out zeroed, address-stable blocks from a region.
///
/// The heap owns the region. All metadata lives in the region itself, so a
/// heap reopened after a crash sees every allocation whose metadata update
/// was flushed. Allocation is serialized by an internal lock; reads and
/// writes through [`Heap::memory`] are not.
#[derive(Debug)]
pub struct Heap<M> {
    memory: M,
    alloc_lock: Mutex<()>,
}

impl<M: PersistentMemory> Heap<M> {
    /// Formats `memory` as an empty heap.
    ///
    /// The region magic is written and flushed last, so a crash during
    /// formatting leaves a region that is still reported as unformatted.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is too small or a primitive fails.
    pub fn format(memory: M) -> PmemResult<Self> {
        if memory.size() < HEAP_START + BLOCK_HEADER_SIZE {
            return Err(PmemError::Corrupted(format!(
                "region of {} bytes is too small for a heap",
                memory.size()
            )));
        }

        memory.store(TOP_SLOT, HEAP_START)?;
        memory.store(FREE_HEAD_SLOT, PAddr::NULL)?;
        memory.store(ROOT_SLOT, PAddr::NULL)?;
        memory.flush(PAddr::new(8), 24)?;
        memory.fence()?;
        memory.persist(MAGIC_SLOT, REGION_MAGIC)?;

        debug!(size = memory.size(), "formatted persistent heap");
        Ok(Self {
            memory,
            alloc_lock: Mutex::new(()),
        })
    }

    /// Opens a previously formatted heap.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::Corrupted`] if the region magic or heap top is invalid.
    pub fn open(memory: M) -> PmemResult<Self> {
        let magic = memory.load(MAGIC_SLOT)?;
        if magic != REGION_MAGIC {
            return Err(PmemError::Corrupted(format!(
                "region magic mismatch: expected {REGION_MAGIC:#x}, found {magic:#x}"
            )));
        }

        let top = memory.load(TOP_SLOT)?;
        if top < HEAP_START || top > memory.size() {
            return Err(PmemError::Corrupted(format!(
                "heap top {top:#x} outside region of {} bytes",
                memory.size()
            )));
        }

        Ok(Self {
            memory,
            alloc_lock: Mutex::new(()),
        })
    }

    /// Opens the heap if the region is formatted, otherwise formats it.
    ///
    /// # Errors
    ///
    /// Returns an error if opening or formatting fails.
    pub fn open_or_format(memory: M) -> PmemResult<Self> {
        if Self::is_formatted(&memory)? {
            Self::open(memory)
        } else {
            Self::format(memory)
        }
    }

    /// Returns true if `memory` carries the region magic.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic cannot be read.
    pub fn is_formatted(memory: &M) -> PmemResult<bool> {
        Ok(memory.load(MAGIC_SLOT)? == REGION_MAGIC)
    }

    /// Returns the underlying region.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Consumes the heap and returns the region.
    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Allocates a zeroed block of at least `len` bytes.
    ///
    /// The block and the metadata describing it are durable when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::OutOfMemory`] if no free block fits and the heap is full.
    pub fn alloc(&self, len: usize) -> PmemResult<PAddr> {
        let size = round_up(len.max(8) as u64);
        let _guard = self.alloc_lock.lock();

        if let Some(payload) = self.take_free_block(size)? {
            return Ok(payload);
        }

        let top = self.memory.load(TOP_SLOT)?;
        let needed = BLOCK_HEADER_SIZE + size;
        let available = self.memory.size().saturating_sub(top);
        if needed > available {
            return Err(PmemError::OutOfMemory {
                requested: len,
                available,
            });
        }

        let block = PAddr::new(top);
        let payload = block.add(BLOCK_HEADER_SIZE);
        self.memory.store(PPtr::<u64>::new(block), size)?;
        self.memory.store(PPtr::<PAddr>::new(block.add(8)), PAddr::NULL)?;
        self.memory.write(payload, &vec![0u8; size as usize])?;
        self.memory.flush(block, needed as usize)?;
        self.memory.fence()?;
        self.memory.persist(TOP_SLOT, top + needed)?;

        Ok(payload)
    }

    /// Allocates a zeroed array of `count` values of `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation fails.
    pub fn alloc_array<T: Persist>(&self, count: usize) -> PmemResult<PAddr> {
        self.alloc(count * T::SIZE)
    }

    /// Allocates space for one `T` and durably stores `value` there.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation or the store fails.
    pub fn alloc_value<T: Persist>(&self, value: T) -> PmemResult<PPtr<T>> {
        let ptr = PPtr::new(self.alloc(T::SIZE)?);
        self.memory.persist(ptr, value)?;
        Ok(ptr)
    }

    /// Returns a block to the free list.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::Corrupted`] if `payload` was not handed out by this heap.
    pub fn free(&self, payload: PAddr) -> PmemResult<()> {
        let _guard = self.alloc_lock.lock();
        let block = self.block_of(payload)?;

        let head = self.memory.load(FREE_HEAD_SLOT)?;
        self.memory.persist(PPtr::<PAddr>::new(block.add(8)), head)?;
        self.memory.persist(FREE_HEAD_SLOT, block)?;
        Ok(())
    }

    /// Returns the usable payload size of an allocated block.
    ///
    /// # Errors
    ///
    /// Returns [`PmemError::Corrupted`] if `payload` is not a block payload.
    pub fn block_size(&self, payload: PAddr) -> PmemResult<usize> {
        let block = self.block_of(payload)?;
        Ok(self.memory.load(PPtr::<u64>::new(block))? as usize)
    }

    /// Returns the application root pointer, or null if none was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the root slot cannot be read.
    pub fn root(&self) -> PmemResult<PAddr> {
        self.memory.load(ROOT_SLOT)
    }

    /// Durably stores the application root pointer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or flush fails.
    pub fn set_root(&self, root: PAddr) -> PmemResult<()> {
        self.memory.persist(ROOT_SLOT, root)
    }

    /// Bytes consumed by the bump area, including freed blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the heap top cannot be read.
    pub fn used(&self) -> PmemResult<u64> {
        Ok(self.memory.load(TOP_SLOT)? - HEAP_START)
    }

    fn take_free_block(&self, size: u64) -> PmemResult<Option<PAddr>> {
        let mut link: PPtr<PAddr> = FREE_HEAD_SLOT;
        let mut current = self.memory.load(link)?;

        while !current.is_null() {
            if !self.memory.contains(current, BLOCK_HEADER_SIZE as usize) {
                return Err(PmemError::Corrupted(format!(
                    "free list entry {current} outside heap"
                )));
            }
            let block_size = self.memory.load(PPtr::<u64>::new(current))?;
            let next_link = PPtr::<PAddr>::new(current.add(8));
            let next = self.memory.load(next_link)?;

            if block_size >= size {
                self.memory.persist(link, next)?;

                let payload = current.add(BLOCK_HEADER_SIZE);
                self.memory.store(next_link, PAddr::NULL)?;
                self.memory.write(payload, &vec![0u8; block_size as usize])?;
                self.memory
                    .flush(current, (BLOCK_HEADER_SIZE + block_size) as usize)?;
                self.memory.fence()?;
                return Ok(Some(payload));
            }

            link = next_link;
            current = next;
        }

        Ok(None)
    }

    fn block_of(&self, payload: PAddr) -> PmemResult<PAddr> {
        let top = self.memory.load(TOP_SLOT)?;
        let raw = payload.as_u64();
        if raw < HEAP_START + BLOCK_HEADER_SIZE || raw >= top || raw % 8 != 0 {
            return Err(PmemError::Corrupted(format!(
                "{payload} is not a heap block payload"
            )));
        }
        Ok(PAddr::new(raw - BLOCK_HEADER_SIZE))
    }
}

const fn round_up(len: u64) -> u64 {
    (len + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegion;

    fn heap(size: usize) -> Heap<InMemoryRegion> {
        Heap::format(InMemoryRegion::new(size)).unwrap()
    }

    #[test]
    fn format_then_open() {
        let heap = heap(4096);
        let region = heap.into_memory().crash();
        let reopened = Heap::open(region).unwrap();
        assert_eq!(reopened.root().unwrap(), PAddr::NULL);
        assert_eq!(reopened.used().unwrap(), 0);
    }

    #[test]
    fn open_unformatted_fails() {
        let result = Heap::open(InMemoryRegion::new(4096));
        assert!(matches!(result, Err(PmemError::Corrupted(_))));
    }

    #[test]
    fn open_or_format_formats_once() {
        let heap = Heap::open_or_format(InMemoryRegion::new(4096)).unwrap();
        let block = heap.alloc(32).unwrap();
        let region = heap.into_memory().crash();

        let heap = Heap::open_or_format(region).unwrap();
        assert_eq!(heap.block_size(block).unwrap(), 32);
    }

    #[test]
    fn alloc_is_aligned_and_zeroed() {
        let heap = heap(4096);
        let a = heap.alloc(3).unwrap();
        let b = heap.alloc(20).unwrap();

        assert_eq!(a.as_u64() % 8, 0);
        assert_eq!(b.as_u64() % 8, 0);
        assert!(b.as_u64() >= a.as_u64() + 8 + BLOCK_HEADER_SIZE);
        assert_eq!(heap.block_size(b).unwrap(), 24);
        assert_eq!(heap.memory().read(b, 24).unwrap(), vec![0; 24]);
    }

    #[test]
    fn alloc_survives_crash() {
        let heap = heap(4096);
        let ptr = heap.alloc_value(77u64).unwrap();

        let heap = Heap::open(heap.into_memory().crash()).unwrap();
        assert_eq!(heap.memory().load(ptr).unwrap(), 77);

        // The bump pointer moved past the surviving block
        let next = heap.alloc(8).unwrap();
        assert!(next.as_u64() > ptr.addr().as_u64());
    }

    #[test]
    fn freed_block_is_reused_and_rezeroed() {
        let heap = heap(4096);
        let a = heap.alloc(64).unwrap();
        heap.memory().write(a, &[0xAB; 64]).unwrap();
        heap.free(a).unwrap();

        let b = heap.alloc(48).unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.memory().read(b, 64).unwrap(), vec![0; 64]);
    }

    #[test]
    fn free_list_is_first_fit() {
        let heap = heap(8192);
        let small = heap.alloc(16).unwrap();
        let large = heap.alloc(256).unwrap();
        heap.free(small).unwrap();
        heap.free(large).unwrap();

        // Head is `large`; the 16-byte block is too small for 100 bytes
        let again = heap.alloc(100).unwrap();
        assert_eq!(again, large);
        let tiny = heap.alloc(8).unwrap();
        assert_eq!(tiny, small);
    }

    #[test]
    fn out_of_memory() {
        let heap = heap(256);
        let result = heap.alloc(1024);
        assert!(matches!(result, Err(PmemError::OutOfMemory { .. })));
    }

    #[test]
    fn free_rejects_foreign_address() {
        let heap = heap(4096);
        assert!(heap.free(PAddr::new(8)).is_err());
        assert!(heap.free(PAddr::new(4000)).is_err());
    }

    #[test]
    fn root_is_durable() {
        let heap = heap(4096);
        let block = heap.alloc(8).unwrap();
        heap.set_root(block).unwrap();

        let heap = Heap::open(heap.into_memory().crash()).unwrap();
        assert_eq!(heap.root().unwrap(), block);
    }

    #[test]
    fn alloc_array_sizes_by_element() {
        let heap = heap(4096);
        let arr = heap.alloc_array::<u32>(5).unwrap();
        assert_eq!(heap.block_size(arr).unwrap(), 24);
    }
}
