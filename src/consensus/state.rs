//! Consensus State
//!
//! The per-node Raft state machine: role, term, vote, log and
//! commit/apply positions. Pure and synchronous; the node task
//! owns one behind a lock and feeds it messages and timer expiries.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::protocol::{LogEntry, LogIndex, Message};
use crate::types::NodeId;

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Waiting for heartbeats from a leader
    Follower,
    /// Running for election
    Candidate,
    /// Won the election
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "FOLLOWER"),
            Role::Candidate => write!(f, "CANDIDATE"),
            Role::Leader => write!(f, "LEADER"),
        }
    }
}

/// Result of counting votes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Not a candidate for the message's term
    Ignored,
    /// Still waiting for votes
    Pending,
    /// Reached a majority and became leader
    Won,
    /// A majority rejected; reverted to follower
    Lost,
    /// Saw a higher term and stepped down
    SteppedDown,
}

/// Raft state of a single node
#[derive(Debug)]
pub struct RaftState {
    id: NodeId,
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: Vec<LogEntry>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    votes_granted: HashSet<NodeId>,
    votes_rejected: HashSet<NodeId>,
    election_deadline: Instant,
    next_heartbeat: Instant,
}

impl RaftState {
    /// Create a follower at term 0 with the given election timeout
    pub fn new(id: NodeId, now: Instant, timeout: Duration) -> Self {
        Self {
            id,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            votes_granted: HashSet::new(),
            votes_rejected: HashSet::new(),
            election_deadline: now + timeout,
            next_heartbeat: now,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    /// Leader of the current term, if known
    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn last_log_index(&self) -> LogIndex {
        self.log.len() as LogIndex
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// When the node loop must next wake up
    ///
    /// Leaders wake for heartbeats, everyone else for the election timeout.
    pub fn deadline(&self) -> Instant {
        match self.role {
            Role::Leader => self.next_heartbeat,
            Role::Follower | Role::Candidate => self.election_deadline,
        }
    }

    /// Start an election for the next term
    pub fn start_election(&mut self, now: Instant, timeout: Duration) -> Message {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_granted.clear();
        self.votes_granted.insert(self.id);
        self.votes_rejected.clear();
        self.election_deadline = now + timeout;

        tracing::info!(
            "Node {} is in candidate state for term {}",
            self.id,
            self.current_term
        );

        Message::RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        }
    }

    /// Become a follower, adopting `term` if it is newer
    pub fn become_follower(&mut self, term: u64, now: Instant, timeout: Duration) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }

        if self.role != Role::Follower {
            tracing::info!(
                "Node {} stepping down to follower for term {}",
                self.id,
                self.current_term
            );
        }

        self.role = Role::Follower;
        self.votes_granted.clear();
        self.votes_rejected.clear();
        self.election_deadline = now + timeout;
    }

    fn become_leader(&mut self, now: Instant) {
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.next_heartbeat = now;

        tracing::info!(
            "Node {} won election for term {}, becoming LEADER",
            self.id,
            self.current_term
        );
    }

    /// Handle a vote request from a candidate
    pub fn handle_vote_request(
        &mut self,
        term: u64,
        candidate_id: NodeId,
        last_log_index: LogIndex,
        last_log_term: u64,
        now: Instant,
        timeout: Duration,
    ) -> Message {
        // If term is stale, reject
        if term < self.current_term {
            return Message::VoteResponse {
                node_id: self.id,
                term: self.current_term,
                vote_granted: false,
            };
        }

        if term > self.current_term {
            self.become_follower(term, now, timeout);
        }

        let can_vote = match self.voted_for {
            None => true,
            Some(id) => id == candidate_id,
        };

        // Candidate's log must be at least as up-to-date as ours
        let log_ok = (last_log_term, last_log_index) >= (self.last_log_term(), self.last_log_index());

        let vote_granted = can_vote && log_ok;

        if vote_granted {
            self.voted_for = Some(candidate_id);
            self.election_deadline = now + timeout;

            tracing::info!(
                "Node {} granting vote to {} for term {}",
                self.id,
                candidate_id,
                term
            );
        }

        Message::VoteResponse {
            node_id: self.id,
            term: self.current_term,
            vote_granted,
        }
    }

    /// Handle a vote response
    pub fn handle_vote_response(
        &mut self,
        voter_id: NodeId,
        term: u64,
        vote_granted: bool,
        cluster_size: usize,
        now: Instant,
        timeout: Duration,
    ) -> ElectionOutcome {
        if term > self.current_term {
            self.become_follower(term, now, timeout);
            return ElectionOutcome::SteppedDown;
        }

        if self.role != Role::Candidate || term != self.current_term {
            return ElectionOutcome::Ignored;
        }

        if vote_granted {
            if self.votes_granted.insert(voter_id) {
                tracing::info!(
                    "Node {} received vote from {} ({}/{})",
                    self.id,
                    voter_id,
                    self.votes_granted.len(),
                    quorum(cluster_size)
                );
            }
        } else {
            self.votes_rejected.insert(voter_id);
        }

        self.check_election_result(cluster_size, now, timeout)
    }

    /// Check if the current candidacy is decided
    pub fn check_election_result(
        &mut self,
        cluster_size: usize,
        now: Instant,
        timeout: Duration,
    ) -> ElectionOutcome {
        if self.role != Role::Candidate {
            return ElectionOutcome::Ignored;
        }

        let quorum = quorum(cluster_size);

        if self.votes_granted.len() >= quorum {
            self.become_leader(now);
            ElectionOutcome::Won
        } else if self.votes_rejected.len() > cluster_size.saturating_sub(quorum) {
            tracing::info!(
                "Node {} lost election for term {} ({} rejections)",
                self.id,
                self.current_term,
                self.votes_rejected.len()
            );
            self.become_follower(self.current_term, now, timeout);
            ElectionOutcome::Lost
        } else {
            ElectionOutcome::Pending
        }
    }

    /// Handle a heartbeat from a leader
    pub fn handle_heartbeat(
        &mut self,
        term: u64,
        leader_id: NodeId,
        now: Instant,
        timeout: Duration,
    ) -> Message {
        if term < self.current_term {
            return Message::HeartbeatResponse {
                node_id: self.id,
                term: self.current_term,
                success: false,
            };
        }

        if term > self.current_term || self.role != Role::Follower {
            self.become_follower(term, now, timeout);
        }

        if self.leader_id != Some(leader_id) {
            tracing::debug!(
                "Node {} following leader {} for term {}",
                self.id,
                leader_id,
                term
            );
        }
        self.leader_id = Some(leader_id);
        self.election_deadline = now + timeout;

        Message::HeartbeatResponse {
            node_id: self.id,
            term: self.current_term,
            success: true,
        }
    }

    /// Step down if a peer reports a newer term
    ///
    /// Returns true if this node stepped down.
    pub fn observe_term(&mut self, term: u64, now: Instant, timeout: Duration) -> bool {
        if term > self.current_term {
            self.become_follower(term, now, timeout);
            true
        } else {
            false
        }
    }

    /// Build the next leader heartbeat and schedule the one after it
    pub fn heartbeat(&mut self, now: Instant, interval: Duration) -> Option<Message> {
        if self.role != Role::Leader {
            return None;
        }

        self.next_heartbeat = now + interval;

        Some(Message::Heartbeat {
            term: self.current_term,
            leader_id: self.id,
            commit_index: self.commit_index,
        })
    }

    /// Give up a candidacy whose election timeout elapsed
    pub fn abandon_election(&mut self, now: Instant, timeout: Duration) {
        if self.role == Role::Candidate {
            tracing::info!(
                "Node {} election for term {} timed out, reverting to follower",
                self.id,
                self.current_term
            );
            self.become_follower(self.current_term, now, timeout);
        }
    }

    /// Append entries to the end of the log
    ///
    /// Each entry is stamped with its index and the current term.
    /// Returns the index of the last entry.
    pub fn append(&mut self, entries: Vec<LogEntry>) -> LogIndex {
        for mut entry in entries {
            entry.index = self.last_log_index() + 1;
            entry.term = self.current_term;
            self.log.push(entry);
        }
        self.last_log_index()
    }

    /// Drop uncommitted entries from `from` onwards
    ///
    /// Committed entries are never removed. Returns the number of
    /// entries dropped.
    pub fn truncate_uncommitted(&mut self, from: LogIndex) -> usize {
        let keep = from.saturating_sub(1).max(self.commit_index);
        let before = self.log.len();
        if keep < self.last_log_index() {
            self.log.truncate(keep as usize);
        }
        before - self.log.len()
    }

    /// Raise the commit index, clamped to the log length
    ///
    /// The commit index never moves backwards.
    pub fn advance_commit_index(&mut self, index: LogIndex) -> LogIndex {
        let target = index.min(self.last_log_index());
        if target > self.commit_index {
            self.commit_index = target;
        }
        self.commit_index
    }

    /// The next committed entry that has not been applied
    pub fn next_committed(&self) -> Option<&LogEntry> {
        if self.last_applied < self.commit_index {
            self.log.get(self.last_applied as usize)
        } else {
            None
        }
    }

    /// Record that the entry after `last_applied` was applied
    pub fn mark_applied(&mut self, index: LogIndex) {
        debug_assert_eq!(index, self.last_applied + 1);
        debug_assert!(index <= self.commit_index);
        self.last_applied = index;
    }
}

/// Majority of a cluster of `size` nodes
pub fn quorum(size: usize) -> usize {
    (size / 2) + 1
}
