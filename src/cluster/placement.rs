//! Shard Placement
//!
//! Tracks which nodes hold each shard and how many shards every node
//! serves. Assignments are permanent: shards are never rebalanced.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{NodeId, ShardId};

/// Shard-to-replica-set table plus per-node shard counts
#[derive(Debug, Clone)]
pub struct ShardPlacement {
    /// Nodes per shard
    replication_factor: usize,
    /// Capacity of a single node
    max_shards_per_node: usize,
    /// Replica set of every placed shard
    shard_to_nodes: BTreeMap<ShardId, Vec<NodeId>>,
    /// Shards served by every registered node
    node_shard_count: BTreeMap<NodeId, usize>,
}

impl ShardPlacement {
    /// Create an empty placement table
    pub fn new(replication_factor: usize, max_shards_per_node: usize) -> Self {
        Self {
            replication_factor,
            max_shards_per_node,
            shard_to_nodes: BTreeMap::new(),
            node_shard_count: BTreeMap::new(),
        }
    }

    /// Register a node with zero shards
    ///
    /// Returns false if the node was already known.
    pub fn register_node(&mut self, node_id: NodeId) -> bool {
        if self.node_shard_count.contains_key(&node_id) {
            return false;
        }
        self.node_shard_count.insert(node_id, 0);
        true
    }

    /// Shards served by a node
    pub fn shard_count(&self, node_id: NodeId) -> Option<usize> {
        self.node_shard_count.get(&node_id).copied()
    }

    /// Replica set of a shard
    pub fn replicas(&self, shard_id: ShardId) -> Option<&[NodeId]> {
        self.shard_to_nodes.get(&shard_id).map(Vec::as_slice)
    }

    /// Nodes that can take another shard, in ID order
    pub fn available_nodes(&self) -> Vec<NodeId> {
        self.node_shard_count
            .iter()
            .filter(|(_, count)| **count < self.max_shards_per_node)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Assign a shard to a replica set and charge each node one shard
    pub fn assign(&mut self, shard_id: ShardId, nodes: Vec<NodeId>) -> Result<()> {
        if self.shard_to_nodes.contains_key(&shard_id) {
            return Err(Error::Internal(format!("shard {} is already placed", shard_id)));
        }

        if nodes.len() != self.replication_factor {
            return Err(Error::Internal(format!(
                "shard {} needs {} replicas, got {}",
                shard_id,
                self.replication_factor,
                nodes.len()
            )));
        }

        for (i, node_id) in nodes.iter().enumerate() {
            if nodes[..i].contains(node_id) {
                return Err(Error::Internal(format!("node {} listed twice for shard {}", node_id, shard_id)));
            }
            match self.node_shard_count.get(node_id) {
                None => return Err(Error::NodeNotFound(*node_id)),
                Some(count) if *count >= self.max_shards_per_node => {
                    return Err(Error::Internal(format!(
                        "node {} is at capacity ({} shards)",
                        node_id, count
                    )));
                }
                Some(_) => {}
            }
        }

        for node_id in &nodes {
            if let Some(count) = self.node_shard_count.get_mut(node_id) {
                *count += 1;
            }
        }

        tracing::info!("Assigned shard {} to nodes {:?}", shard_id, nodes);
        self.shard_to_nodes.insert(shard_id, nodes);
        Ok(())
    }

    /// All placed shards in ID order
    pub fn assignments(&self) -> impl Iterator<Item = (ShardId, &[NodeId])> {
        self.shard_to_nodes.iter().map(|(id, nodes)| (*id, nodes.as_slice()))
    }

    /// Shard count of every registered node
    pub fn shard_counts(&self) -> &BTreeMap<NodeId, usize> {
        &self.node_shard_count
    }
}
