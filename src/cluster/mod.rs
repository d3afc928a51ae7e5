//! Cluster Module
//!
//! Shard placement and the coordinator that routes records to replica
//! sets of consensus nodes.

mod coordinator;
mod placement;

pub use coordinator::{ClusterCoordinator, ClusterSummary, InsertOutcome};
pub use placement::ShardPlacement;
