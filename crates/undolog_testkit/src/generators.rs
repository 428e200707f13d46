//! Property-based test generators using proptest.
//!
//! Provides strategies for generating engine configurations, transaction
//! scripts and crash points.

use proptest::prelude::*;
use undolog_core::{CoreResult, Engine, EngineConfig};
use undolog_pmem::{PPtr, PersistentMemory};

/// A single logged write to one of a fixed set of `u64` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOp {
    /// Index of the slot written.
    pub slot: usize,
    /// Value written.
    pub value: u64,
}

/// A transaction: writes spread over nested Begin/End pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxScript {
    /// Extra Begin/End levels wrapped inside the outermost pair.
    pub depth: usize,
    /// Writes in program order.
    pub writes: Vec<WriteOp>,
    /// Whether the outermost `end` runs.
    pub commit: bool,
}

impl TxScript {
    /// Slot values after the script, starting from `initial`.
    ///
    /// An uncommitted script leaves every slot as it was.
    pub fn expected(&self, initial: &[u64]) -> Vec<u64> {
        let mut values = initial.to_vec();
        if self.commit {
            for op in &self.writes {
                values[op.slot] = op.value;
            }
        }
        values
    }

    /// Runs the script on a fresh handle.
    ///
    /// Writes are split evenly between the nesting levels. The handle is
    /// released when the script returns, so an uncommitted script is rolled
    /// back in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a handle cannot be acquired or a log call fails.
    pub fn run<M: PersistentMemory>(&self, engine: &Engine<M>, slots: &[PPtr<u64>]) -> CoreResult<()> {
        let mut tx = engine.acquire()?;
        tx.begin();
        for _ in 0..self.depth {
            tx.begin();
        }

        let per_level = self.writes.len() / (self.depth + 1) + 1;
        for (i, op) in self.writes.iter().enumerate() {
            tx.log_set(slots[op.slot], op.value)?;
            if (i + 1) % per_level == 0 && tx.level() > 1 {
                tx.end()?;
            }
        }
        while tx.level() > 1 {
            tx.end()?;
        }

        if self.commit {
            tx.end()?;
        }
        engine.release(tx)
    }
}

/// Strategy for slot values.
pub fn arb_value() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(0u64),
        Just(u64::MAX),
        any::<u64>(),
    ]
}

/// Strategy for writes over `slots` slots.
pub fn arb_write_op(slots: usize) -> impl Strategy<Value = WriteOp> {
    (0..slots, arb_value()).prop_map(|(slot, value)| WriteOp { slot, value })
}

/// Strategy for a list of writes.
pub fn arb_write_ops(slots: usize, max_writes: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(arb_write_op(slots), 0..=max_writes)
}

/// Strategy for transaction scripts.
pub fn arb_tx_script(slots: usize, max_writes: usize) -> impl Strategy<Value = TxScript> {
    (0..4usize, arb_write_ops(slots, max_writes), any::<bool>()).prop_map(
        |(depth, writes, commit)| TxScript {
            depth,
            writes,
            commit,
        },
    )
}

/// Strategy for small engine configurations.
pub fn arb_engine_config() -> impl Strategy<Value = EngineConfig> {
    (1..=4usize, 1..=8usize, 0..=2usize, 8..=32usize).prop_map(
        |(pool, capacity, large_pool, large_capacity)| {
            EngineConfig::new()
                .pool_size(pool)
                .initial_log_capacity(capacity)
                .large_pool_size(large_pool)
                .large_log_capacity(large_capacity)
        },
    )
}

/// Strategy for a crash point: how many flushes land before power is cut.
pub fn arb_crash_point(max_flushes: u64) -> impl Strategy<Value = u64> {
    0..=max_flushes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::CrashableRegion;
    use crate::fixtures::{recover_image, scenarios, TestEngine};
    use undolog_pmem::Heap;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn generated_configs_are_accepted(config in arb_engine_config()) {
            let test_engine = TestEngine::memory_with(config.clone());
            prop_assert_eq!(test_engine.config().pool_size, config.pool_size);
        }

        #[test]
        fn scripts_apply_or_roll_back(script in arb_tx_script(4, 12)) {
            let (engine, slots) = scenarios::populated_engine(4);
            let initial = scenarios::read_slots(&engine, &slots);

            script.run(&engine, &slots).unwrap();

            let expected = script.expected(&initial);
            prop_assert_eq!(scenarios::read_slots(&engine, &slots), expected.clone());
            let recovered = engine.crash_and_recover();
            prop_assert_eq!(scenarios::read_slots(&recovered, &slots), expected);
        }

        #[test]
        fn crash_anywhere_is_atomic(
            writes in arb_write_ops(3, 8),
            point in arb_crash_point(200),
        ) {
            let heap = Heap::format(CrashableRegion::new(1 << 16)).unwrap();
            let engine = Engine::open(heap, crate::fixtures::test_config()).unwrap();
            let slots = scenarios::alloc_slots(&engine, 3);
            let initial = scenarios::read_slots(&engine, &slots);
            let script = TxScript { depth: 0, writes, commit: true };

            engine.heap().memory().crash_after(point);
            script.run(&engine, &slots).unwrap();

            let recovered = recover_image(
                engine.heap().memory().durable_image(),
                crate::fixtures::test_config(),
            );
            let actual = scenarios::read_slots(&recovered, &slots);
            prop_assert!(actual == initial || actual == script.expected(&initial));
        }
    }

    #[test]
    fn expected_ignores_uncommitted_writes() {
        let script = TxScript {
            depth: 1,
            writes: vec![WriteOp { slot: 0, value: 9 }],
            commit: false,
        };
        assert_eq!(script.expected(&[1, 2]), vec![1, 2]);
    }

    #[test]
    fn expected_keeps_last_write_per_slot() {
        let script = TxScript {
            depth: 0,
            writes: vec![
                WriteOp { slot: 1, value: 5 },
                WriteOp { slot: 1, value: 6 },
            ],
            commit: true,
        };
        assert_eq!(script.expected(&[1, 2]), vec![1, 6]);
    }
}
