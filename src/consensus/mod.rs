//! Consensus Module
//!
//! Raft-style leader election and per-node log replication.
//! Every node runs its own state machine task; nodes talk through an
//! in-process transport with real vote request/response rounds.

pub mod protocol;
pub mod state;
mod transport;
mod node;

pub use protocol::{Envelope, LogEntry, LogIndex, Message};
pub use state::{ElectionOutcome, RaftState, Role};
pub use transport::Transport;
pub use node::{ConsensusNode, NodeStatus};
