//! Locks held on behalf of a transaction.

use parking_lot::RwLock;
use std::sync::Arc;

/// Any owned guard. Dropping the box unlocks.
trait Held {}

impl<G> Held for G {}

/// Reader and writer guards taken through a handle.
///
/// Guards are owned, so the set can outlive the borrow that took them.
/// Releasing drops every write guard and then every read guard; a released
/// set is empty, so a second release does nothing.
#[derive(Default)]
pub(crate) struct LockSet {
    reads: Vec<Box<dyn Held>>,
    writes: Vec<Box<dyn Held>>,
}

impl LockSet {
    pub(crate) fn read<T: 'static>(&mut self, lock: &Arc<RwLock<T>>) {
        self.reads.push(Box::new(lock.read_arc()));
    }

    pub(crate) fn write<T: 'static>(&mut self, lock: &Arc<RwLock<T>>) {
        self.writes.push(Box::new(lock.write_arc()));
    }

    pub(crate) fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    pub(crate) fn release(&mut self) {
        self.writes.clear();
        self.reads.clear();
    }
}

impl std::fmt::Debug for LockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSet")
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_unlocks_everything() {
        let a = Arc::new(RwLock::new(1u32));
        let b = Arc::new(RwLock::new(()));
        let mut set = LockSet::default();

        set.write(&a);
        set.read(&b);
        assert_eq!(set.len(), 2);
        assert!(a.try_read().is_none());
        assert!(b.try_write().is_none());

        set.release();
        assert_eq!(set.len(), 0);
        assert!(a.try_write().is_some());
        assert!(b.try_write().is_some());
    }

    #[test]
    fn second_release_is_noop() {
        let lock = Arc::new(RwLock::new(()));
        let mut set = LockSet::default();
        set.write(&lock);
        set.release();
        set.release();
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn shared_reads_coexist() {
        let lock = Arc::new(RwLock::new(()));
        let mut set = LockSet::default();
        set.read(&lock);
        set.read(&lock);
        assert!(lock.try_read().is_some());
        assert!(lock.try_write().is_none());
    }
}
