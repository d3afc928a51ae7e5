//! ShardRaft - Sharded, Replicated Record Store
//!
//! Records get a monotonically increasing ID and land in a range shard
//! (`record_id / shard_size`). Each shard is stored on a replica set of
//! `replication_factor` nodes, and the cluster grows horizontally when
//! every node is at its shard capacity.
//!
//! # Architecture
//!
//! Every node runs a Raft-style election loop on its own task and talks
//! to its peers through an in-process transport. A write is appended to
//! the log of each replica, committed once a majority of the replica set
//! acknowledged it, and only then applied to the node's SQLite store.
//!
//! # Features
//!
//! - Range sharding with lazy shard creation
//! - Capacity-bounded shard placement with automatic scale-out
//! - Leader election with terms, vote requests and heartbeats
//! - Majority-acknowledged writes applied in log order
//! - Per-node SQLite stores, in memory or on disk

pub mod config;
pub mod error;
pub mod types;
pub mod id;
pub mod shard;
pub mod store;
pub mod consensus;
pub mod cluster;

pub use config::ShardRaftConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{ClusterCoordinator, ClusterSummary, InsertOutcome};
    pub use crate::config::ShardRaftConfig;
    pub use crate::consensus::{ConsensusNode, LogEntry, Message, NodeStatus, Role};
    pub use crate::error::{Error, Result};
    pub use crate::shard::{Shard, ShardMap};
    pub use crate::store::{RecordStore, SqliteStore};
    pub use crate::types::{NodeId, Record, RecordId, Row, ShardId};
}
