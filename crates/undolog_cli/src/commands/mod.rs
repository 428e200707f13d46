//! CLI command implementations.

pub mod init;
pub mod inspect;
pub mod recover;
pub mod verify;

use clap::Args;
use undolog_core::{
    EngineConfig, DEFAULT_LARGE_LOG_CAPACITY, DEFAULT_LARGE_POOL_SIZE, DEFAULT_LOG_CAPACITY,
    DEFAULT_MAGIC, DEFAULT_POOL_SIZE,
};

/// Engine parameters shared by commands that open an engine.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Handles in the small pool
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Initial log capacity of small handles, in entries
    #[arg(long, default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,

    /// Handles in the large pool
    #[arg(long, default_value_t = DEFAULT_LARGE_POOL_SIZE)]
    pub large_pool_size: usize,

    /// Log capacity of large handles, in entries
    #[arg(long, default_value_t = DEFAULT_LARGE_LOG_CAPACITY)]
    pub large_log_capacity: usize,

    /// Transaction header validity marker
    #[arg(long, default_value_t = DEFAULT_MAGIC)]
    pub magic: u64,
}

impl EngineArgs {
    /// Builds the engine configuration.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new()
            .pool_size(self.pool_size)
            .initial_log_capacity(self.log_capacity)
            .large_pool_size(self.large_pool_size)
            .large_log_capacity(self.large_log_capacity)
            .magic(self.magic)
    }
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            log_capacity: DEFAULT_LOG_CAPACITY,
            large_pool_size: DEFAULT_LARGE_POOL_SIZE,
            large_log_capacity: DEFAULT_LARGE_LOG_CAPACITY,
            magic: DEFAULT_MAGIC,
        }
    }
}

/// Formats a byte count for display.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
