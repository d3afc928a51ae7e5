//! ShardRaft Error Types

use thiserror::Error;

use crate::types::{NodeId, ShardId};

/// Result type alias for ShardRaft operations
pub type Result<T> = std::result::Result<T, Error>;

/// ShardRaft error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Record store errors
    #[error("Record store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    // Cluster errors
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Shard not found: {0}")]
    ShardNotFound(ShardId),

    #[error("Quorum not reached: {reached}/{required}")]
    QuorumNotReached { reached: usize, required: usize },

    #[error("Node {0} has stopped")]
    NodeStopped(NodeId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QuorumNotReached { .. } | Error::NodeStopped(_)
        )
    }
}
