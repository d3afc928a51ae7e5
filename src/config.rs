//! ShardRaft Configuration
//!
//! This module provides configuration structures for the sharded,
//! replicated record store and its consensus nodes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::NodeId;

/// Main ShardRaft configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardRaftConfig {
    /// Sharding and replication settings
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Leader election timing
    #[serde(default)]
    pub election: ElectionConfig,

    /// Record store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sharding and replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of nodes holding a copy of each shard
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Number of consecutive record IDs per shard
    #[serde(default = "default_shard_size")]
    pub shard_size: u64,

    /// Maximum number of shards a single node may serve
    #[serde(default = "default_max_shards_per_node")]
    pub max_shards_per_node: usize,

    /// Nodes registered when the coordinator is created
    #[serde(default = "default_initial_node_count")]
    pub initial_node_count: usize,
}

/// Election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Minimum election timeout in milliseconds (randomized)
    #[serde(default = "default_timeout_min_ms")]
    pub timeout_min_ms: u64,

    /// Maximum election timeout in milliseconds (randomized)
    #[serde(default = "default_timeout_max_ms")]
    pub timeout_max_ms: u64,

    /// Leader heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Per-node inbox capacity; messages beyond it are dropped
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

/// Record store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for per-node SQLite files (in-memory when unset)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_replication_factor() -> usize {
    3
}

fn default_shard_size() -> u64 {
    10
}

fn default_max_shards_per_node() -> usize {
    3
}

fn default_initial_node_count() -> usize {
    1
}

fn default_timeout_min_ms() -> u64 {
    1500
}

fn default_timeout_max_ms() -> u64 {
    3000
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_inbox_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            shard_size: default_shard_size(),
            max_shards_per_node: default_max_shards_per_node(),
            initial_node_count: default_initial_node_count(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            timeout_min_ms: default_timeout_min_ms(),
            timeout_max_ms: default_timeout_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClusterConfig {
    /// Replicas that must acknowledge a write before it commits
    pub fn write_quorum(&self) -> usize {
        crate::consensus::state::quorum(self.replication_factor)
    }
}

impl ElectionConfig {
    /// Generate a random election timeout
    pub fn random_timeout(&self) -> Duration {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let ms = rng.gen_range(self.timeout_min_ms..=self.timeout_max_ms);
        Duration::from_millis(ms)
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl StorageConfig {
    /// Path of the database file for a node, if stores are on disk
    pub fn node_db_path(&self, node_id: NodeId) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("node_{}.db", node_id)))
    }
}

impl ShardRaftConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ShardRaftConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster.replication_factor == 0 {
            return Err(crate::Error::Config("cluster.replication_factor must be at least 1".into()));
        }

        if self.cluster.shard_size == 0 {
            return Err(crate::Error::Config("cluster.shard_size must be at least 1".into()));
        }

        if self.cluster.max_shards_per_node == 0 {
            return Err(crate::Error::Config("cluster.max_shards_per_node must be at least 1".into()));
        }

        if self.cluster.initial_node_count == 0 {
            return Err(crate::Error::Config("cluster.initial_node_count must be at least 1".into()));
        }

        if self.election.timeout_min_ms == 0 || self.election.timeout_min_ms > self.election.timeout_max_ms {
            return Err(crate::Error::Config(format!(
                "election timeout range {}..={} ms is invalid",
                self.election.timeout_min_ms, self.election.timeout_max_ms
            )));
        }

        if self.election.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config("election.heartbeat_interval_ms must be at least 1".into()));
        }

        if self.election.heartbeat_interval_ms >= self.election.timeout_min_ms {
            tracing::warn!(
                "Heartbeat interval {} ms is not below the minimum election timeout {} ms; followers will keep starting elections",
                self.election.heartbeat_interval_ms,
                self.election.timeout_min_ms
            );
        }

        if self.election.inbox_capacity == 0 {
            return Err(crate::Error::Config("election.inbox_capacity must be at least 1".into()));
        }

        Ok(())
    }
}
