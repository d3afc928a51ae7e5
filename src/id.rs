//! Record ID Generator
//!
//! Hands out process-unique, monotonically increasing record IDs.
//! The shard map derives shard membership from these IDs
//! (`record_id / shard_size`), so they are dense small integers
//! rather than time-based IDs.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::RecordId;

/// Record ID Generator
///
/// Thread-safe counter starting at 0; the first call to `generate`
/// returns 1. Owned by whoever needs IDs and passed explicitly.
#[derive(Debug, Default)]
pub struct RecordIdGenerator {
    last: AtomicU64,
}

impl RecordIdGenerator {
    /// Create a new generator whose first ID is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator that continues after `last`
    pub fn starting_after(last: RecordId) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Generate a new unique ID
    ///
    /// This method is lock-free and thread-safe.
    pub fn generate(&self) -> RecordId {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Generate multiple IDs
    pub fn generate_batch(&self, count: usize) -> Vec<RecordId> {
        (0..count).map(|_| self.generate()).collect()
    }

    /// The most recently issued ID (0 if none yet)
    pub fn last_issued(&self) -> RecordId {
        self.last.load(Ordering::SeqCst)
    }
}
