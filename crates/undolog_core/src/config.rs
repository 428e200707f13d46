//! Engine configuration.
//!
//! The defaults are smaller than the classic pmem undo-log sizing of 500
//! small handles with 128 entries and 12 large handles with 16Ki entries,
//! which needs about 8 MiB of logs up front. With these defaults a fresh
//! engine fits in a 1 MiB region. Raise the pool sizes for workloads with
//! hundreds of concurrent transactions.

/// Default number of handles in the small pool.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default initial log capacity of a small handle, in entries.
pub const DEFAULT_LOG_CAPACITY: usize = 128;

/// Default number of handles in the large pool.
pub const DEFAULT_LARGE_POOL_SIZE: usize = 4;

/// Default initial log capacity of a large handle, in entries.
pub const DEFAULT_LARGE_LOG_CAPACITY: usize = 4096;

/// Default header validity marker.
pub const DEFAULT_MAGIC: u64 = 131_071;

/// Configuration for initializing an engine.
///
/// Pool sizes and capacities only shape a newly created header. When an
/// existing header is recovered, the values stored in it win.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of handles in the small pool.
    pub pool_size: usize,

    /// Initial log capacity of each small handle, in entries.
    pub initial_log_capacity: usize,

    /// Number of handles in the large pool.
    pub large_pool_size: usize,

    /// Initial log capacity of each large handle, in entries.
    pub large_log_capacity: usize,

    /// Header validity marker.
    pub magic: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            initial_log_capacity: DEFAULT_LOG_CAPACITY,
            large_pool_size: DEFAULT_LARGE_POOL_SIZE,
            large_log_capacity: DEFAULT_LARGE_LOG_CAPACITY,
            magic: DEFAULT_MAGIC,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the small pool size.
    #[must_use]
    pub const fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the initial log capacity of small handles.
    #[must_use]
    pub const fn initial_log_capacity(mut self, entries: usize) -> Self {
        self.initial_log_capacity = entries;
        self
    }

    /// Sets the large pool size.
    #[must_use]
    pub const fn large_pool_size(mut self, size: usize) -> Self {
        self.large_pool_size = size;
        self
    }

    /// Sets the initial log capacity of large handles.
    #[must_use]
    pub const fn large_log_capacity(mut self, entries: usize) -> Self {
        self.large_log_capacity = entries;
        self
    }

    /// Sets the header validity marker.
    #[must_use]
    pub const fn magic(mut self, magic: u64) -> Self {
        self.magic = magic;
        self
    }

    /// Checks that the configuration can build a header.
    pub(crate) fn validate(&self) -> crate::CoreResult<()> {
        if self.pool_size == 0 {
            return Err(crate::CoreError::validation("pool size must be at least 1"));
        }
        if self.initial_log_capacity == 0 || self.large_log_capacity == 0 {
            return Err(crate::CoreError::validation(
                "log capacity must be at least 1 entry",
            ));
        }
        if self.magic == 0 {
            return Err(crate::CoreError::validation("magic must be nonzero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.initial_log_capacity, DEFAULT_LOG_CAPACITY);
        assert_eq!(config.magic, 131_071);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_engine_fits_in_one_mib() {
        use crate::{Engine, PoolClass};
        use undolog_pmem::{Heap, InMemoryRegion};

        let heap = Heap::format(InMemoryRegion::new(1 << 20)).unwrap();
        let engine = Engine::open(heap, EngineConfig::default()).unwrap();
        assert_eq!(engine.header().records(PoolClass::Small).len(), DEFAULT_POOL_SIZE);
        assert_eq!(
            engine.header().records(PoolClass::Large).len(),
            DEFAULT_LARGE_POOL_SIZE
        );
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .pool_size(2)
            .initial_log_capacity(4)
            .large_pool_size(0)
            .magic(7);

        assert_eq!(config.pool_size, 2);
        assert_eq!(config.initial_log_capacity, 4);
        assert_eq!(config.large_pool_size, 0);
        assert_eq!(config.magic, 7);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(EngineConfig::new().pool_size(0).validate().is_err());
        assert!(EngineConfig::new().initial_log_capacity(0).validate().is_err());
        assert!(EngineConfig::new().magic(0).validate().is_err());
    }
}
