//! Log entry layout.

use undolog_pmem::{PAddr, Persist};

/// Encoded size of a log entry in bytes.
pub const ENTRY_SIZE: usize = 32;

/// One undo step: where the data lives, where its pre-image was copied, and
/// how many bytes to restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogEntry {
    /// Address of the logged location.
    pub original: PAddr,
    /// Address of the pre-image copy.
    pub backup: PAddr,
    /// Number of bytes covered.
    pub size: u64,
    /// Epoch tag; 0 marks an empty slot.
    pub generation: u64,
}

impl LogEntry {
    /// An empty slot.
    pub const EMPTY: LogEntry = LogEntry {
        original: PAddr::NULL,
        backup: PAddr::NULL,
        size: 0,
        generation: 0,
    };

    /// Returns true if the slot holds no undo record.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.generation == 0
    }

    /// Returns true if the slot holds an undo record of epoch `epoch`.
    #[must_use]
    pub const fn is_live(&self, epoch: u64) -> bool {
        self.generation != 0 && self.generation == epoch
    }
}

impl Persist for LogEntry {
    const SIZE: usize = ENTRY_SIZE;

    fn encode(&self, out: &mut [u8]) {
        self.original.encode(&mut out[0..8]);
        self.backup.encode(&mut out[8..16]);
        self.size.encode(&mut out[16..24]);
        self.generation.encode(&mut out[24..32]);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            original: PAddr::decode(&bytes[0..8]),
            backup: PAddr::decode(&bytes[8..16]),
            size: u64::decode(&bytes[16..24]),
            generation: u64::decode(&bytes[24..32]),
        }
    }
}
