//! Consensus Protocol
//!
//! Messages exchanged between consensus nodes and the entries
//! they keep in their logs.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Record, RecordId};

/// Position of an entry in a node's log (1-based, 0 = empty log)
pub type LogIndex = u64;

/// Replicated log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, assigned on append
    pub index: LogIndex,
    /// Term of the node when the entry was appended
    pub term: u64,
    /// Shard table the record belongs to
    pub table: String,
    pub record_id: RecordId,
    pub record: Record,
}

impl LogEntry {
    /// Create an entry that has not been appended yet
    pub fn new(table: impl Into<String>, record_id: RecordId, record: Record) -> Self {
        Self {
            index: 0,
            term: 0,
            table: table.into(),
            record_id,
            record,
        }
    }
}

/// Protocol messages for node communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== Leader Election ==========
    /// Request vote (from candidate)
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: u64,
    },

    /// Vote response
    VoteResponse {
        node_id: NodeId,
        term: u64,
        vote_granted: bool,
    },

    // ========== Heartbeat ==========
    /// Heartbeat from leader
    Heartbeat {
        term: u64,
        leader_id: NodeId,
        commit_index: LogIndex,
    },

    /// Heartbeat response
    HeartbeatResponse {
        node_id: NodeId,
        term: u64,
        success: bool,
    },
}

impl Message {
    /// Term carried by the message
    pub fn term(&self) -> u64 {
        match self {
            Message::RequestVote { term, .. }
            | Message::VoteResponse { term, .. }
            | Message::Heartbeat { term, .. }
            | Message::HeartbeatResponse { term, .. } => *term,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVote { .. } => "RequestVote",
            Message::VoteResponse { .. } => "VoteResponse",
            Message::Heartbeat { .. } => "Heartbeat",
            Message::HeartbeatResponse { .. } => "HeartbeatResponse",
        }
    }
}

/// A message in flight between two nodes
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: NodeId,
    pub message: Message,
}
