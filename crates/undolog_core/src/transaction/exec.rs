//! Closure-scoped transactions.

use crate::error::{CoreError, CoreResult};
use crate::transaction::handle::TxHandle;
use undolog_pmem::PersistentMemory;

impl<M: PersistentMemory> TxHandle<'_, M> {
    /// Runs `f` inside one transaction level.
    ///
    /// Begins, calls `f` with this handle, then ends. `f` may nest further
    /// levels but must close every level it opens. Locks taken through the
    /// handle inside `f` are released by the closing end when it is the
    /// outermost one; locks the caller took itself stay with the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnbalancedNesting`] if `f` returns at a different
    /// level than it started at. End has still run in that case. Also returns
    /// any commit error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use undolog_core::{Engine, EngineConfig};
    /// use undolog_pmem::{Heap, InMemoryRegion};
    ///
    /// let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
    /// let engine = Engine::open(heap, EngineConfig::new().pool_size(1)).unwrap();
    /// let from = engine.heap().alloc_value(50u64).unwrap();
    /// let to = engine.heap().alloc_value(0u64).unwrap();
    ///
    /// let mut tx = engine.acquire().unwrap();
    /// tx.exec(|tx| -> undolog_core::CoreResult<()> {
    ///     let amount = 20;
    ///     let balance = tx.read(from)?;
    ///     tx.log_set(from, balance - amount)?;
    ///     tx.log_set(to, amount)?;
    ///     Ok(())
    /// })
    /// .unwrap()
    /// .unwrap();
    ///
    /// assert_eq!(tx.read(from).unwrap(), 30);
    /// assert_eq!(tx.read(to).unwrap(), 20);
    /// ```
    pub fn exec<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> CoreResult<R> {
        self.begin();
        let expected = self.level;
        let result = f(self);
        let found = self.level;
        self.end()?;

        if found != expected {
            return Err(CoreError::UnbalancedNesting { expected, found });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::{CoreError, Engine, EngineConfig};
    use parking_lot::RwLock;
    use std::sync::Arc;
    use undolog_pmem::{Heap, InMemoryRegion, PersistentMemory};

    fn engine() -> Engine<InMemoryRegion> {
        let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
        Engine::open(heap, EngineConfig::new().pool_size(1).large_pool_size(0)).unwrap()
    }

    #[test]
    fn exec_commits_closure() {
        let engine = engine();
        let x = engine.heap().alloc_value(1u32).unwrap();
        let mut tx = engine.acquire().unwrap();

        let doubled = tx
            .exec(|tx| {
                let v = tx.read(x).unwrap();
                tx.log_set(x, v * 2).unwrap();
                v * 2
            })
            .unwrap();

        assert_eq!(doubled, 2);
        assert!(tx.is_idle());
        assert_eq!(engine.stats().transactions_committed(), 1);
        assert_eq!(engine.heap().memory().crash().load(x).unwrap(), 2);
    }

    #[test]
    fn exec_nests_inside_open_transaction() {
        let engine = engine();
        let x = engine.heap().alloc_value(1u32).unwrap();
        let mut tx = engine.acquire().unwrap();

        tx.begin();
        tx.exec(|tx| tx.log_set(x, 5).unwrap()).unwrap();
        assert_eq!(tx.level(), 1);
        assert_eq!(tx.logged(), 1);
        tx.end().unwrap();
        assert_eq!(tx.logged(), 0);
    }

    #[test]
    fn extra_begin_is_unbalanced() {
        let engine = engine();
        let mut tx = engine.acquire().unwrap();

        let result = tx.exec(|tx| tx.begin());
        assert!(matches!(
            result,
            Err(CoreError::UnbalancedNesting {
                expected: 1,
                found: 2
            })
        ));
        assert_eq!(tx.level(), 1);
    }

    #[test]
    fn extra_end_is_unbalanced() {
        let engine = engine();
        let mut tx = engine.acquire().unwrap();

        let result = tx.exec(|tx| {
            tx.end().unwrap();
        });
        assert!(matches!(
            result,
            Err(CoreError::UnbalancedNesting {
                expected: 1,
                found: 0
            })
        ));
        assert!(tx.is_idle());
    }

    #[test]
    fn exec_releases_locks_taken_inside() {
        let engine = engine();
        let inner = Arc::new(RwLock::new(()));
        let outer = Arc::new(RwLock::new(()));
        let mut tx = engine.acquire().unwrap();

        let guard = outer.write();
        tx.exec(|tx| tx.wlock(&inner)).unwrap();
        assert!(inner.try_write().is_some());
        assert!(outer.try_read().is_none());
        drop(guard);
    }
}
