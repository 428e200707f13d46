//! Handle checkout bitmap.

use parking_lot::{Condvar, Mutex};

/// Tracks which handles of a fixed-size pool are checked out.
///
/// A set bit means the handle is in use. The bitmap is volatile and starts
/// clear on every initialization.
#[derive(Debug)]
pub struct HandlePool {
    bits: Mutex<Vec<u64>>,
    available: Condvar,
    size: usize,
}

impl HandlePool {
    /// Creates a pool of `size` free handles.
    pub fn new(size: usize) -> Self {
        let words = size.div_ceil(64);
        let mut bits = vec![0u64; words];
        // Bits past the end of the pool are permanently claimed
        let tail_bits = size % 64;
        if tail_bits != 0 {
            if let Some(last) = bits.last_mut() {
                *last = !0u64 << tail_bits;
            }
        }
        Self {
            bits: Mutex::new(bits),
            available: Condvar::new(),
            size,
        }
    }

    /// Number of handles in the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Claims a free handle, blocking until one is released.
    pub fn acquire(&self) -> usize {
        let mut bits = self.bits.lock();
        loop {
            if let Some(index) = Self::claim(&mut bits) {
                return index;
            }
            self.available.wait(&mut bits);
        }
    }

    /// Claims a free handle without blocking.
    pub fn try_acquire(&self) -> Option<usize> {
        Self::claim(&mut self.bits.lock())
    }

    /// Returns handle `index` to the pool and wakes one waiter.
    pub fn release(&self, index: usize) {
        if index >= self.size {
            return;
        }
        let mut bits = self.bits.lock();
        bits[index / 64] &= !(1u64 << (index % 64));
        drop(bits);
        self.available.notify_one();
    }

    /// Number of handles currently checked out.
    pub fn in_use(&self) -> usize {
        let bits = self.bits.lock();
        let set: usize = bits.iter().map(|w| w.count_ones() as usize).sum();
        set - (bits.len() * 64 - self.size)
    }

    fn claim(bits: &mut [u64]) -> Option<usize> {
        for (word_index, word) in bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = (!*word).trailing_zeros() as usize;
                *word |= 1u64 << bit;
                return Some(word_index * 64 + bit);
            }
        }
        None
    }
}
