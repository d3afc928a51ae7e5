//! Shard Map
//!
//! Partitions the record ID space into fixed-size, contiguous shards.
//! Shard `n` covers record IDs `n * shard_size ..= n * shard_size + shard_size - 1`,
//! so the shard of a record is always `record_id / shard_size`. The map
//! only tracks which shards have been created; it never deletes them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{RecordId, ShardId};

/// A created shard and its inclusive record ID range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub start: RecordId,
    pub end: RecordId,
}

impl Shard {
    /// Compute the deterministic range for a shard
    ///
    /// Ranges past the end of the ID space are clamped to `u64::MAX`.
    pub fn new(id: ShardId, shard_size: u64) -> Self {
        let start = id.saturating_mul(shard_size);
        Self {
            id,
            start,
            end: start.saturating_add(shard_size.saturating_sub(1)),
        }
    }

    /// Check if a record ID falls inside this shard
    pub fn contains(&self, record_id: RecordId) -> bool {
        (self.start..=self.end).contains(&record_id)
    }

    /// Name of the table holding this shard's records
    pub fn table_name(&self) -> String {
        table_name(self.id)
    }
}

/// Table name used by record stores for a shard
pub fn table_name(shard_id: ShardId) -> String {
    format!("shard_{}", shard_id)
}

/// Map of created shards
#[derive(Debug, Clone)]
pub struct ShardMap {
    shard_size: u64,
    shards: BTreeMap<ShardId, Shard>,
}

impl ShardMap {
    /// Create an empty shard map
    ///
    /// # Panics
    /// Panics if shard_size is 0
    pub fn new(shard_size: u64) -> Self {
        assert!(shard_size > 0, "shard size must be at least 1");

        Self {
            shard_size,
            shards: BTreeMap::new(),
        }
    }

    /// Number of record IDs per shard
    pub fn shard_size(&self) -> u64 {
        self.shard_size
    }

    /// The shard a record belongs to, whether or not it exists yet
    pub fn shard_id_for(&self, record_id: RecordId) -> ShardId {
        record_id / self.shard_size
    }

    /// Register a shard, recording its range
    ///
    /// Calling this again for the same ID stores the identical range.
    pub fn create_shard(&mut self, shard_id: ShardId) -> Shard {
        let shard = Shard::new(shard_id, self.shard_size);
        self.shards.insert(shard_id, shard);

        tracing::info!(
            "Created shard {} with range ({}, {})",
            shard.id,
            shard.start,
            shard.end
        );

        shard
    }

    /// Look up the shard of a record
    ///
    /// Returns `None` when the record's shard has not been created.
    pub fn determine_shard(&self, record_id: RecordId) -> Option<ShardId> {
        let shard_id = self.shard_id_for(record_id);
        self.shards.contains_key(&shard_id).then_some(shard_id)
    }

    /// Assign each record (identified by its position) to a shard,
    /// creating shards on demand
    pub fn distribute_data<T>(&mut self, records: &[T]) -> Vec<(RecordId, ShardId)> {
        tracing::info!("Distributing {} records across {} shards", records.len(), self.shards.len());

        let mut assignments = Vec::with_capacity(records.len());
        for record_id in 0..records.len() as RecordId {
            let shard_id = match self.determine_shard(record_id) {
                Some(id) => id,
                None => self.create_shard(self.shard_id_for(record_id)).id,
            };
            tracing::debug!("Record {} assigned to shard {}", record_id, shard_id);
            assignments.push((record_id, shard_id));
        }

        assignments
    }

    /// Get a created shard
    pub fn get(&self, shard_id: ShardId) -> Option<&Shard> {
        self.shards.get(&shard_id)
    }

    /// All created shards in ID order
    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }

    /// Number of created shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Check if no shard has been created
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_range() {
        let shard = Shard::new(3, 10);
        assert_eq!(shard.start, 30);
        assert_eq!(shard.end, 39);
        assert!(shard.contains(30));
        assert!(shard.contains(39));
        assert!(!shard.contains(40));
        assert_eq!(shard.table_name(), "shard_3");
    }

    #[test]
    fn test_determine_shard_requires_created_shard() {
        let mut map = ShardMap::new(10);
        map.create_shard(3);

        assert_eq!(map.determine_shard(35), Some(3));
        assert_eq!(map.determine_shard(30), Some(3));
        assert_eq!(map.determine_shard(39), Some(3));
        assert_eq!(map.determine_shard(9), None);
        assert_eq!(map.determine_shard(40), None);
    }

    #[test]
    fn test_create_shard_is_idempotent() {
        let mut map = ShardMap::new(10);
        let first = map.create_shard(5);
        let second = map.create_shard(5);

        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(5), Some(&Shard::new(5, 10)));
    }

    #[test]
    fn test_distribute_data_agrees_with_lookup() {
        let mut map = ShardMap::new(10);
        // Shard 4 already exists, so the bulk path must not invent shard ids
        map.create_shard(4);

        let records: Vec<String> = (0..35).map(|i| format!("record {}", i)).collect();
        let assignments = map.distribute_data(&records);

        assert_eq!(assignments.len(), 35);
        for (record_id, shard_id) in &assignments {
            assert_eq!(*shard_id, record_id / 10);
            assert_eq!(map.determine_shard(*record_id), Some(*shard_id));
        }

        let ids: Vec<ShardId> = map.shards().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_last_shard_is_clamped() {
        let mut map = ShardMap::new(10);
        let last = map.create_shard(u64::MAX / 10);
        assert_eq!(last.end, u64::MAX);
        assert!(last.contains(u64::MAX));
        assert_eq!(map.determine_shard(u64::MAX), Some(u64::MAX / 10));

        let beyond = map.create_shard(u64::MAX);
        assert_eq!(beyond.start, u64::MAX);
        assert_eq!(beyond.end, u64::MAX);
    }

    #[test]
    fn test_empty_map() {
        let map = ShardMap::new(10);
        assert!(map.is_empty());
        assert_eq!(map.shard_id_for(99), 9);
        assert_eq!(map.determine_shard(0), None);
    }
}
