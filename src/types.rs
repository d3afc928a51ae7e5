//! Core types shared by the shard map, consensus nodes and record stores.

use serde::{Deserialize, Serialize};

/// Cluster member identifier. Node ids start at 1.
pub type NodeId = u64;

/// Unique record identifier handed out by the id generator.
pub type RecordId = u64;

/// Shard identifier (`record_id / shard_size`).
pub type ShardId = u64;

/// Application record written into a shard table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub email: String,
    pub data: String,
}

impl Record {
    /// Create a new record
    pub fn new(name: impl Into<String>, email: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            data: data.into(),
        }
    }
}

/// A row returned by a full scan of a record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Table the row was read from
    pub table: String,
    pub record_id: RecordId,
    pub name: String,
    pub email: String,
    pub data: String,
}

impl Row {
    /// Rebuild the record payload of this row
    pub fn record(&self) -> Record {
        Record::new(self.name.clone(), self.email.clone(), self.data.clone())
    }
}
