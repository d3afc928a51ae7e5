//! Cluster Coordinator
//!
//! Owns the node registry, the shard map and the shard placement table.
//! Routes writes to their shard's replica set, grows the cluster when
//! every node is at capacity, and fans reads out to all nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::placement::ShardPlacement;
use crate::config::{ClusterConfig, ShardRaftConfig};
use crate::consensus::state::quorum;
use crate::consensus::{ConsensusNode, LogEntry, LogIndex, NodeStatus, Role, Transport};
use crate::error::{Error, Result};
use crate::id::RecordIdGenerator;
use crate::shard::{self, Shard, ShardMap};
use crate::store::{sqlite_store_factory, RecordStore, StoreFactory};
use crate::types::{NodeId, Record, RecordId, Row, ShardId};

/// Where an inserted record ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub record_id: RecordId,
    pub shard_id: ShardId,
    /// Replicas whose store holds the record
    pub replicas: Vec<NodeId>,
    /// Full replica set of the shard
    pub replica_set: Vec<NodeId>,
}

/// Cluster summary information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub running_nodes: usize,
    pub total_shards: usize,
    pub leader_id: Option<NodeId>,
    pub leader_term: Option<u64>,
    pub shards_per_node: BTreeMap<NodeId, usize>,
}

/// Coordinates shards, replica sets and consensus nodes
///
/// Operations that change cluster-wide maps take `&mut self`, so a
/// coordinator is never driven from two callers at once.
pub struct ClusterCoordinator {
    config: ShardRaftConfig,
    transport: Arc<Transport>,
    nodes: BTreeMap<NodeId, Arc<ConsensusNode>>,
    shards: ShardMap,
    placement: ShardPlacement,
    ids: RecordIdGenerator,
    store_factory: StoreFactory,
}

impl ClusterCoordinator {
    /// Create a coordinator with `initial_node_count` registered nodes
    /// backed by SQLite stores
    pub async fn new(config: ShardRaftConfig) -> Result<Self> {
        let factory = sqlite_store_factory(config.storage.clone());
        Self::with_store_factory(config, factory).await
    }

    /// Create a coordinator whose nodes get their stores from `store_factory`
    pub async fn with_store_factory(config: ShardRaftConfig, store_factory: StoreFactory) -> Result<Self> {
        config.validate()?;

        let mut coordinator = Self {
            transport: Arc::new(Transport::new()),
            nodes: BTreeMap::new(),
            shards: ShardMap::new(config.cluster.shard_size),
            placement: ShardPlacement::new(
                config.cluster.replication_factor,
                config.cluster.max_shards_per_node,
            ),
            ids: RecordIdGenerator::new(),
            store_factory,
            config,
        };

        for node_id in 1..=coordinator.config.cluster.initial_node_count as NodeId {
            coordinator.add_node(node_id).await?;
        }

        Ok(coordinator)
    }

    fn cluster(&self) -> &ClusterConfig {
        &self.config.cluster
    }

    /// Insert a record into its shard on every running replica
    ///
    /// The record lands on the whole replica set when every replica is
    /// running, and on at least a majority of it otherwise.
    pub async fn insert_data(
        &mut self,
        name: impl Into<String>,
        email: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<InsertOutcome> {
        let record = Record::new(name, email, data);
        let record_id = self.ids.generate();
        let shard_id = self.shards.shard_id_for(record_id);

        let existing = self
            .shards
            .determine_shard(record_id)
            .and_then(|id| self.placement.replicas(id).map(<[NodeId]>::to_vec));

        let replicas = match existing {
            Some(replicas) => replicas,
            None => {
                let replicas = self.place_shard(shard_id).await?;
                self.shards.create_shard(shard_id);
                replicas
            }
        };

        let stored = match self.replicate_data_across_nodes(shard_id, record_id, &record, &replicas).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("Error inserting record {} into shard {}: {}", record_id, shard_id, e);
                return Err(e);
            }
        };

        tracing::info!("Inserted record {} into shard {} on nodes {:?}", record_id, shard_id, stored);

        Ok(InsertOutcome {
            record_id,
            shard_id,
            replicas: stored,
            replica_set: replicas,
        })
    }

    /// Pick the replica set for a new shard, growing the cluster if needed
    async fn place_shard(&mut self, shard_id: ShardId) -> Result<Vec<NodeId>> {
        let replication_factor = self.cluster().replication_factor;
        let mut available = self.placement.available_nodes();

        if available.len() < replication_factor {
            tracing::info!(
                "Only {} nodes have capacity for shard {}, adding nodes",
                available.len(),
                shard_id
            );
            let new_nodes = self.add_new_nodes().await?;
            available.extend(new_nodes.iter().map(|node| node.id()));
        }

        available.truncate(replication_factor);
        self.placement.assign(shard_id, available.clone())?;
        Ok(available)
    }

    /// Append a record to every replica's log, then commit and apply it
    /// once a majority of the replica set acknowledged
    ///
    /// Returns the nodes that applied the record. Without a majority of
    /// appends the entry is rolled back from every log that took it.
    async fn replicate_data_across_nodes(
        &self,
        shard_id: ShardId,
        record_id: RecordId,
        record: &Record,
        replicas: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let table = shard::table_name(shard_id);
        let mut acks: Vec<(Arc<ConsensusNode>, LogIndex)> = Vec::with_capacity(replicas.len());

        for node_id in replicas {
            let node = self.node(*node_id)?;
            let appended: Result<LogIndex> = async {
                node.store().create_table(&table).await?;
                node.replicate_log_entries(vec![LogEntry::new(table.as_str(), record_id, record.clone())])
                    .await
            }
            .await;

            match appended {
                Ok(index) => acks.push((node, index)),
                Err(e) => tracing::warn!("Node {} did not append record {}: {}", node_id, record_id, e),
            }
        }

        let required = quorum(replicas.len());
        if acks.len() < required {
            for (node, index) in &acks {
                node.truncate_uncommitted(*index).await;
            }
            return Err(Error::QuorumNotReached {
                reached: acks.len(),
                required,
            });
        }

        let mut committed = Vec::with_capacity(acks.len());
        for (node, index) in acks {
            match node.advance_commit_index(index).await {
                Ok(_) => committed.push(node),
                Err(e) => tracing::warn!("Node {} did not commit record {}: {}", node.id(), record_id, e),
            }
        }

        let mut stored = Vec::with_capacity(committed.len());
        for node in &committed {
            match node.apply_committed_entries(node.store().as_ref()).await {
                Ok(_) => stored.push(node.id()),
                Err(e) => tracing::warn!("Node {} did not apply record {}: {}", node.id(), record_id, e),
            }
        }

        if stored.len() < required {
            return Err(Error::QuorumNotReached {
                reached: stored.len(),
                required,
            });
        }

        Ok(stored)
    }

    /// Scan every node's store and concatenate the rows
    ///
    /// Each record appears once per replica; nothing is deduplicated.
    pub async fn query_data(&self) -> Result<Vec<Row>> {
        let scans = self.nodes.values().map(|node| {
            let node = Arc::clone(node);
            async move { node.store().query_all_records().await }
        });

        let results = match futures::future::try_join_all(scans).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Error querying data: {}", e);
                return Err(e);
            }
        };

        let rows: Vec<Row> = results.into_iter().flatten().collect();
        tracing::info!("Queried {} rows from {} nodes", rows.len(), self.nodes.len());
        Ok(rows)
    }

    /// Register a node with zero shards
    ///
    /// Returns the existing handle if the node is already registered.
    pub async fn add_node(&mut self, node_id: NodeId) -> Result<Arc<ConsensusNode>> {
        if let Some(node) = self.nodes.get(&node_id) {
            return Ok(Arc::clone(node));
        }

        let store = (self.store_factory)(node_id)?;
        let node = ConsensusNode::new(
            node_id,
            self.config.election.clone(),
            Arc::clone(&self.transport),
            store,
        )
        .await;

        self.placement.register_node(node_id);
        self.nodes.insert(node_id, Arc::clone(&node));

        tracing::info!("Added node {} to the distributed system", node_id);
        Ok(node)
    }

    /// Add `replication_factor` nodes after the highest node ID, start
    /// them and put each into a fresh election
    pub async fn add_new_nodes(&mut self) -> Result<Vec<Arc<ConsensusNode>>> {
        let count = self.cluster().replication_factor as NodeId;
        let first = self.nodes.keys().next_back().copied().unwrap_or(0) + 1;
        let new_ids: Vec<NodeId> = (first..first + count).collect();

        let mut new_nodes = Vec::with_capacity(new_ids.len());
        for node_id in &new_ids {
            new_nodes.push(self.add_node(*node_id).await?);
        }

        tracing::info!("Scaled horizontally by adding nodes {:?}", new_ids);

        self.start_raft_nodes(Some(&new_nodes)).await?;
        self.conduct_new_election(Some(&new_nodes)).await?;

        Ok(new_nodes)
    }

    fn targets(&self, nodes: Option<&[Arc<ConsensusNode>]>) -> Vec<Arc<ConsensusNode>> {
        match nodes {
            Some(nodes) => nodes.to_vec(),
            None => self.nodes.values().cloned().collect(),
        }
    }

    /// Start the given nodes (all nodes by default)
    pub async fn start_raft_nodes(&self, nodes: Option<&[Arc<ConsensusNode>]>) -> Result<()> {
        for node in self.targets(nodes) {
            node.start().await?;
        }
        Ok(())
    }

    /// Force the given nodes (all nodes by default) into a new election
    pub async fn conduct_new_election(&self, nodes: Option<&[Arc<ConsensusNode>]>) -> Result<()> {
        for node in self.targets(nodes) {
            node.begin_election().await?;
        }
        Ok(())
    }

    /// Stop every node loop
    pub async fn shutdown(&self) -> Result<()> {
        for node in self.nodes.values() {
            node.stop().await?;
        }
        tracing::info!("Stopped {} nodes", self.nodes.len());
        Ok(())
    }

    /// Get a registered node
    pub fn node(&self, node_id: NodeId) -> Result<Arc<ConsensusNode>> {
        self.nodes
            .get(&node_id)
            .cloned()
            .ok_or(Error::NodeNotFound(node_id))
    }

    /// All registered node IDs in order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// All registered nodes in ID order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<ConsensusNode>> {
        self.nodes.values()
    }

    /// Replica set of a shard
    pub fn replicas_for(&self, shard_id: ShardId) -> Option<&[NodeId]> {
        self.placement.replicas(shard_id)
    }

    /// Shards served by a node
    pub fn shard_count(&self, node_id: NodeId) -> Option<usize> {
        self.placement.shard_count(node_id)
    }

    /// Get a created shard
    pub fn shard(&self, shard_id: ShardId) -> Result<&Shard> {
        self.shards.get(shard_id).ok_or(Error::ShardNotFound(shard_id))
    }

    pub fn shard_map(&self) -> &ShardMap {
        &self.shards
    }

    pub fn placement(&self) -> &ShardPlacement {
        &self.placement
    }

    pub fn config(&self) -> &ShardRaftConfig {
        &self.config
    }

    /// Status of every node in ID order
    pub async fn node_statuses(&self) -> Vec<NodeStatus> {
        let mut statuses = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.values() {
            statuses.push(node.status().await);
        }
        statuses
    }

    /// Current leader; the leader with the highest term wins
    pub async fn leader(&self) -> Option<NodeStatus> {
        self.node_statuses()
            .await
            .into_iter()
            .filter(|s| s.role == Role::Leader)
            .max_by_key(|s| s.term)
    }

    /// Get cluster summary
    pub async fn summary(&self) -> ClusterSummary {
        let statuses = self.node_statuses().await;
        let leader = statuses
            .iter()
            .filter(|s| s.role == Role::Leader)
            .max_by_key(|s| s.term);

        ClusterSummary {
            total_nodes: statuses.len(),
            running_nodes: statuses.iter().filter(|s| s.running).count(),
            total_shards: self.shards.len(),
            leader_id: leader.map(|s| s.id),
            leader_term: leader.map(|s| s.term),
            shards_per_node: self.placement.shard_counts().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElectionConfig;
    use crate::store::SqliteStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// In-memory SQLite store whose writes can be made to fail
    struct FaultyStore {
        inner: SqliteStore,
        fail_tables: Arc<AtomicBool>,
        fail_inserts: bool,
    }

    #[async_trait::async_trait]
    impl RecordStore for FaultyStore {
        async fn create_table(&self, table: &str) -> Result<()> {
            if self.fail_tables.load(Ordering::SeqCst) {
                return Err(Error::Internal("disk unavailable".into()));
            }
            self.inner.create_table(table).await
        }

        async fn insert_record(&self, table: &str, record_id: RecordId, record: &Record) -> Result<()> {
            if self.fail_inserts {
                return Err(Error::Internal("disk full".into()));
            }
            self.inner.insert_record(table, record_id, record).await
        }

        async fn query_all_records(&self) -> Result<Vec<Row>> {
            self.inner.query_all_records().await
        }
    }

    /// Stores for `faulty` nodes follow `fail_tables` and fail inserts if
    /// `fail_inserts` is set; every other node gets a healthy store
    fn faulty_factory(faulty: Vec<NodeId>, fail_tables: Arc<AtomicBool>, fail_inserts: bool) -> StoreFactory {
        Arc::new(move |node_id| {
            let is_faulty = faulty.contains(&node_id);
            let store = FaultyStore {
                inner: SqliteStore::open_in_memory()?,
                fail_tables: if is_faulty {
                    Arc::clone(&fail_tables)
                } else {
                    Arc::new(AtomicBool::new(false))
                },
                fail_inserts: is_faulty && fail_inserts,
            };
            Ok(Arc::new(store) as Arc<dyn RecordStore>)
        })
    }

    fn copies_of(rows: &[Row], record_id: RecordId) -> usize {
        rows.iter().filter(|r| r.record_id == record_id).count()
    }

    fn test_config(replication_factor: usize, max_shards_per_node: usize, initial_node_count: usize) -> ShardRaftConfig {
        let mut config = ShardRaftConfig::default();
        config.cluster.replication_factor = replication_factor;
        config.cluster.max_shards_per_node = max_shards_per_node;
        config.cluster.initial_node_count = initial_node_count;
        config.election = ElectionConfig {
            timeout_min_ms: 100,
            timeout_max_ms: 200,
            heartbeat_interval_ms: 20,
            inbox_capacity: 64,
        };
        config
    }

    async fn insert_records(coordinator: &mut ClusterCoordinator, count: usize) -> Vec<InsertOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for i in 0..count {
            let outcome = coordinator
                .insert_data(
                    format!("Name{}", i),
                    format!("email{}@example.com", i),
                    format!("Sample data {}", i),
                )
                .await
                .unwrap();
            outcomes.push(outcome);
        }
        outcomes
    }

    #[tokio::test]
    async fn test_eighty_records_across_growing_cluster() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 3, 3)).await.unwrap();
        coordinator.start_raft_nodes(None).await.unwrap();

        let outcomes = insert_records(&mut coordinator, 80).await;

        // Record IDs 1..=80 with shard size 10 span shards 0..=8
        assert_eq!(outcomes.first().unwrap().record_id, 1);
        assert_eq!(outcomes.last().unwrap().record_id, 80);
        assert_eq!(coordinator.shard_map().len(), 9);

        for shard in coordinator.shard_map().shards() {
            let replicas = coordinator.replicas_for(shard.id).unwrap();
            assert_eq!(replicas.len(), 3, "shard {} replica set", shard.id);
        }

        assert_eq!(coordinator.replicas_for(0), Some(&[1, 2, 3][..]));
        assert_eq!(coordinator.replicas_for(3), Some(&[4, 5, 6][..]));
        assert_eq!(coordinator.replicas_for(8), Some(&[7, 8, 9][..]));
        assert_eq!(coordinator.node_ids(), (1..=9).collect::<Vec<_>>());

        for node_id in coordinator.node_ids() {
            assert!(coordinator.shard_count(node_id).unwrap() <= 3);
        }

        let rows = coordinator.query_data().await.unwrap();
        assert_eq!(rows.len(), 80 * 3);

        let mut copies: HashMap<RecordId, usize> = HashMap::new();
        for row in &rows {
            *copies.entry(row.record_id).or_default() += 1;
            assert_eq!(row.table, shard::table_name(row.record_id / 10));
        }
        assert_eq!(copies.len(), 80);
        assert!(copies.values().all(|c| *c == 3));

        for status in coordinator.node_statuses().await {
            assert!(status.last_applied <= status.commit_index);
            assert_eq!(status.commit_index, status.log_len);
        }

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_shard_reuses_replica_set() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 3, 3)).await.unwrap();

        let first = coordinator.insert_data("a", "a@example.com", "one").await.unwrap();
        let second = coordinator.insert_data("b", "b@example.com", "two").await.unwrap();

        assert_eq!(first.shard_id, 0);
        assert_eq!(second.shard_id, 0);
        assert_eq!(first.replicas, second.replicas);
        assert_eq!(coordinator.shard_count(1), Some(1));
        assert_eq!(coordinator.shard(0).unwrap().end, 9);
        assert!(matches!(coordinator.shard(1), Err(Error::ShardNotFound(1))));

        let node = coordinator.node(1).unwrap();
        let log = node.log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].record_id, 1);
        assert_eq!(log[1].record.data, "two");
    }

    #[tokio::test]
    async fn test_saturated_nodes_pull_in_new_nodes() {
        let mut coordinator = ClusterCoordinator::new(test_config(2, 1, 2)).await.unwrap();

        // Record 10 is the first record of shard 1
        let outcomes = insert_records(&mut coordinator, 10).await;

        assert_eq!(outcomes[0].replicas, vec![1, 2]);
        assert_eq!(outcomes[9].shard_id, 1);
        assert_eq!(outcomes[9].replicas, vec![3, 4]);
        assert_eq!(coordinator.node_ids(), vec![1, 2, 3, 4]);

        for node_id in coordinator.node_ids() {
            assert_eq!(coordinator.shard_count(node_id), Some(1));
        }
    }

    #[tokio::test]
    async fn test_partial_capacity_is_extended() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 2, 4)).await.unwrap();

        // Shards 0, 1 and 2
        let outcomes = insert_records(&mut coordinator, 20).await;

        assert_eq!(outcomes[0].replicas, vec![1, 2, 3]);
        assert_eq!(outcomes[10].replicas, vec![1, 2, 3]);
        // Only node 4 had room; nodes 5..=7 were added and 4, 5, 6 chosen
        assert_eq!(outcomes[19].shard_id, 2);
        assert_eq!(outcomes[19].replicas, vec![4, 5, 6]);
        assert_eq!(coordinator.node_ids(), (1..=7).collect::<Vec<_>>());
        assert_eq!(coordinator.shard_count(7), Some(0));
    }

    #[tokio::test]
    async fn test_add_new_nodes_adds_replication_factor_nodes() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 3, 1)).await.unwrap();
        coordinator.add_node(5).await.unwrap();

        let added = coordinator.add_new_nodes().await.unwrap();
        let added_ids: Vec<_> = added.iter().map(|n| n.id()).collect();

        assert_eq!(added_ids, vec![6, 7, 8]);
        assert_eq!(coordinator.node_ids(), vec![1, 5, 6, 7, 8]);

        for node in &added {
            let status = node.status().await;
            assert!(status.running);
            assert!(status.term >= 1);
            assert_eq!(coordinator.shard_count(node.id()), Some(0));
        }

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_node_is_idempotent() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 3, 3)).await.unwrap();
        coordinator.insert_data("a", "a@example.com", "one").await.unwrap();

        let before = coordinator.node(2).unwrap();
        let again = coordinator.add_node(2).await.unwrap();

        assert!(Arc::ptr_eq(&before, &again));
        assert_eq!(coordinator.node_ids(), vec![1, 2, 3]);
        assert_eq!(coordinator.shard_count(2), Some(1));
    }

    #[tokio::test]
    async fn test_single_node_election() {
        let coordinator = ClusterCoordinator::new(test_config(1, 3, 1)).await.unwrap();
        assert!(coordinator.leader().await.is_none());

        coordinator.conduct_new_election(None).await.unwrap();

        let leader = coordinator.leader().await.unwrap();
        assert_eq!(leader.id, 1);
        let summary = coordinator.summary().await;
        assert_eq!(summary.leader_id, Some(1));
        assert_eq!(summary.total_nodes, 1);
    }

    #[tokio::test]
    async fn test_insert_fails_without_write_quorum() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 3, 3)).await.unwrap();
        coordinator.insert_data("a", "a@example.com", "one").await.unwrap();

        coordinator.node(2).unwrap().stop().await.unwrap();
        coordinator.node(3).unwrap().stop().await.unwrap();

        let err = coordinator.insert_data("b", "b@example.com", "two").await.unwrap_err();
        assert!(matches!(err, Error::QuorumNotReached { reached: 1, required: 2 }));
        assert!(err.is_retryable());

        // The record reached no store and left no log entry behind
        let rows = coordinator.query_data().await.unwrap();
        assert_eq!(rows.len(), 3);
        let status = coordinator.node(1).unwrap().status().await;
        assert_eq!(status.log_len, 1);
        assert_eq!(status.commit_index, 1);
    }

    #[tokio::test]
    async fn test_stopped_replica_is_left_out_of_outcome() {
        let mut coordinator = ClusterCoordinator::new(test_config(3, 3, 3)).await.unwrap();
        let first = coordinator.insert_data("a", "a@example.com", "one").await.unwrap();
        assert_eq!(first.replicas, vec![1, 2, 3]);

        coordinator.node(3).unwrap().stop().await.unwrap();

        let second = coordinator.insert_data("b", "b@example.com", "two").await.unwrap();
        assert_eq!(second.replicas, vec![1, 2]);
        assert_eq!(second.replica_set, vec![1, 2, 3]);

        let rows = coordinator.query_data().await.unwrap();
        assert_eq!(copies_of(&rows, first.record_id), 3);
        assert_eq!(copies_of(&rows, second.record_id), 2);
    }

    #[tokio::test]
    async fn test_failed_apply_does_not_abort_other_replicas() {
        let factory = faulty_factory(vec![2], Arc::new(AtomicBool::new(false)), true);
        let mut coordinator = ClusterCoordinator::with_store_factory(test_config(3, 3, 3), factory)
            .await
            .unwrap();

        let outcome = coordinator.insert_data("a", "a@example.com", "one").await.unwrap();
        assert_eq!(outcome.replicas, vec![1, 3]);
        assert_eq!(outcome.replica_set, vec![1, 2, 3]);

        let rows = coordinator.query_data().await.unwrap();
        assert_eq!(copies_of(&rows, outcome.record_id), 2);

        // Committed on node 2, waiting to be applied
        let status = coordinator.node(2).unwrap().status().await;
        assert_eq!(status.commit_index, 1);
        assert_eq!(status.last_applied, 0);
        let status = coordinator.node(3).unwrap().status().await;
        assert_eq!(status.last_applied, 1);
    }

    #[tokio::test]
    async fn test_insert_fails_when_majority_cannot_apply() {
        let factory = faulty_factory(vec![2, 3], Arc::new(AtomicBool::new(false)), true);
        let mut coordinator = ClusterCoordinator::with_store_factory(test_config(3, 3, 3), factory)
            .await
            .unwrap();

        let err = coordinator.insert_data("a", "a@example.com", "one").await.unwrap_err();
        assert!(matches!(err, Error::QuorumNotReached { reached: 1, required: 2 }));
    }

    #[tokio::test]
    async fn test_rolled_back_entry_is_never_applied() {
        let fail_tables = Arc::new(AtomicBool::new(true));
        let factory = faulty_factory(vec![2, 3], Arc::clone(&fail_tables), false);
        let mut coordinator = ClusterCoordinator::with_store_factory(test_config(3, 3, 3), factory)
            .await
            .unwrap();

        let err = coordinator.insert_data("a", "a@example.com", "one").await.unwrap_err();
        assert!(matches!(err, Error::QuorumNotReached { reached: 1, required: 2 }));
        assert_eq!(coordinator.node(1).unwrap().status().await.log_len, 0);

        fail_tables.store(false, Ordering::SeqCst);
        let outcome = coordinator.insert_data("b", "b@example.com", "two").await.unwrap();
        assert_eq!(outcome.record_id, 2);
        assert_eq!(outcome.replicas, vec![1, 2, 3]);

        let node1 = coordinator.node(1).unwrap();
        let ids: Vec<_> = node1
            .store()
            .query_all_records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.record_id)
            .collect();
        assert_eq!(ids, vec![2]);

        let log = node1.log().await;
        assert_eq!(log.len(), 1);
        assert_eq!((log[0].index, log[0].record_id), (1, 2));
    }

    #[tokio::test]
    async fn test_query_empty_cluster() {
        let coordinator = ClusterCoordinator::new(test_config(3, 3, 2)).await.unwrap();
        assert!(coordinator.query_data().await.unwrap().is_empty());
        let summary = coordinator.summary().await;
        assert_eq!(summary.total_shards, 0);
        assert_eq!(summary.running_nodes, 0);
    }

    #[tokio::test]
    async fn test_file_backed_stores() {
        let dir = tempdir().unwrap();
        let mut config = test_config(2, 3, 2);
        config.storage.data_dir = Some(dir.path().to_path_buf());

        let mut coordinator = ClusterCoordinator::new(config).await.unwrap();
        coordinator.insert_data("a", "a@example.com", "one").await.unwrap();

        assert!(dir.path().join("node_1.db").exists());
        assert!(dir.path().join("node_2.db").exists());
        assert_eq!(coordinator.query_data().await.unwrap().len(), 2);
    }
}
