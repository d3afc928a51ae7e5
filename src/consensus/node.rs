//! Consensus Node
//!
//! Runs one node's follower/candidate/leader loop on its own task and
//! exposes the log operations the cluster coordinator drives.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::protocol::{Envelope, LogEntry, LogIndex, Message};
use super::state::{ElectionOutcome, RaftState, Role};
use super::transport::Transport;
use crate::config::ElectionConfig;
use crate::error::{Error, Result};
use crate::store::RecordStore;
use crate::types::NodeId;

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub role: Role,
    pub term: u64,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub log_len: u64,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub running: bool,
    pub joined_at: DateTime<Utc>,
}

/// A cluster member running the election protocol
pub struct ConsensusNode {
    /// Node ID
    id: NodeId,
    /// Raft state; every log, commit and apply mutation holds this lock
    state: Mutex<RaftState>,
    /// Election timing
    config: ElectionConfig,
    /// Message router shared with the other nodes
    transport: Arc<Transport>,
    /// Store committed entries are applied to
    store: Arc<dyn RecordStore>,
    /// Inbox, taken by the loop when the node starts
    inbox: Mutex<Option<mpsc::Receiver<Envelope>>>,
    /// Wakes the loop when the timer was reset from outside
    wake: Notify,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
    /// Handle of the running loop
    task: Mutex<Option<JoinHandle<()>>>,
    /// When the node was registered
    joined_at: DateTime<Utc>,
}

impl ConsensusNode {
    /// Create a follower and register its inbox with the transport
    pub async fn new(
        id: NodeId,
        config: ElectionConfig,
        transport: Arc<Transport>,
        store: Arc<dyn RecordStore>,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        transport.register(id, inbox_tx).await;

        let state = RaftState::new(id, Instant::now(), config.random_timeout());
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            id,
            state: Mutex::new(state),
            config,
            transport,
            store,
            inbox: Mutex::new(Some(inbox_rx)),
            wake: Notify::new(),
            shutdown,
            task: Mutex::new(None),
            joined_at: Utc::now(),
        })
    }

    /// Get the node ID
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The record store this node applies entries to
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Check if the node has been stopped
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(Error::NodeStopped(self.id))
        } else {
            Ok(())
        }
    }

    /// Start the node loop on the runtime
    ///
    /// Starting an already running node does nothing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.ensure_running()?;

        let Some(inbox) = self.inbox.lock().await.take() else {
            tracing::debug!("Raft node {} is already running", self.id);
            return Ok(());
        };

        tracing::info!("Starting Raft node {}", self.id);

        let node = Arc::clone(self);
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move { node.run(inbox, shutdown_rx).await });
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Stop the node loop and leave the cluster membership
    pub async fn stop(&self) -> Result<()> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }

        self.transport.unregister(self.id).await;

        if let Some(handle) = self.task.lock().await.take() {
            handle
                .await
                .map_err(|e| Error::Internal(format!("node {} loop failed: {}", self.id, e)))?;
        }

        tracing::info!("Stopped Raft node {}", self.id);
        Ok(())
    }

    async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let deadline = self.state.lock().await.deadline();

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                received = inbox.recv() => match received {
                    Some(envelope) => self.handle_message(envelope).await,
                    None => break,
                },
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep_until(deadline) => self.on_deadline().await,
            }
        }

        tracing::debug!("Raft node {} loop exited", self.id);
    }

    /// Handle an expired timer
    async fn on_deadline(&self) {
        let now = Instant::now();
        let timeout = self.config.random_timeout();
        let cluster_size = self.transport.size().await;

        let mut state = self.state.lock().await;
        if now < state.deadline() {
            // Timer was reset while we slept
            return;
        }

        match state.role() {
            Role::Follower => {
                tracing::info!("Node {} election timeout, starting leader election", self.id);
                let request = state.start_election(now, timeout);
                let outcome = state.check_election_result(cluster_size, now, timeout);
                let heartbeat = self.heartbeat_after(&mut state, outcome, now);
                drop(state);

                self.transport.broadcast(self.id, request).await;
                if let Some(heartbeat) = heartbeat {
                    self.transport.broadcast(self.id, heartbeat).await;
                }
            }
            Role::Candidate => state.abandon_election(now, timeout),
            Role::Leader => {
                let heartbeat = state.heartbeat(now, self.config.heartbeat_interval());
                drop(state);

                if let Some(heartbeat) = heartbeat {
                    tracing::trace!("Node {} is sending heartbeats", self.id);
                    self.transport.broadcast(self.id, heartbeat).await;
                }
            }
        }
    }

    /// First heartbeat of a freshly won term
    fn heartbeat_after(&self, state: &mut RaftState, outcome: ElectionOutcome, now: Instant) -> Option<Message> {
        match outcome {
            ElectionOutcome::Won => state.heartbeat(now, self.config.heartbeat_interval()),
            _ => None,
        }
    }

    /// Handle a message from a peer
    async fn handle_message(&self, envelope: Envelope) {
        let now = Instant::now();
        let timeout = self.config.random_timeout();

        match envelope.message {
            Message::RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => {
                let reply = self.state.lock().await.handle_vote_request(
                    term,
                    candidate_id,
                    last_log_index,
                    last_log_term,
                    now,
                    timeout,
                );
                self.transport.send(self.id, candidate_id, reply).await;
            }
            Message::VoteResponse {
                node_id,
                term,
                vote_granted,
            } => {
                let cluster_size = self.transport.size().await;
                let heartbeat = {
                    let mut state = self.state.lock().await;
                    let outcome = state.handle_vote_response(node_id, term, vote_granted, cluster_size, now, timeout);
                    self.heartbeat_after(&mut state, outcome, now)
                };

                if let Some(heartbeat) = heartbeat {
                    self.transport.broadcast(self.id, heartbeat).await;
                }
            }
            Message::Heartbeat { term, leader_id, .. } => {
                let reply = self.state.lock().await.handle_heartbeat(term, leader_id, now, timeout);
                self.transport.send(self.id, leader_id, reply).await;
            }
            Message::HeartbeatResponse { term, success, node_id } => {
                if !success && self.state.lock().await.observe_term(term, now, timeout) {
                    tracing::info!(
                        "Node {} saw newer term {} from {}, no longer leader",
                        self.id,
                        term,
                        node_id
                    );
                }
            }
        }
    }

    /// Force the node into a fresh election round
    pub async fn begin_election(&self) -> Result<()> {
        self.ensure_running()?;

        tracing::info!("Node {} is starting leader election", self.id);

        let now = Instant::now();
        let timeout = self.config.random_timeout();
        let cluster_size = self.transport.size().await;

        let (request, heartbeat) = {
            let mut state = self.state.lock().await;
            let request = state.start_election(now, timeout);
            let outcome = state.check_election_result(cluster_size, now, timeout);
            (request, self.heartbeat_after(&mut state, outcome, now))
        };

        // The loop may be sleeping on the old deadline
        self.wake.notify_one();

        self.transport.broadcast(self.id, request).await;
        if let Some(heartbeat) = heartbeat {
            self.transport.broadcast(self.id, heartbeat).await;
        }

        Ok(())
    }

    /// Append entries to the local log
    ///
    /// Returns the index of the last appended entry. Does not commit.
    pub async fn replicate_log_entries(&self, entries: Vec<LogEntry>) -> Result<LogIndex> {
        self.ensure_running()?;

        tracing::debug!("Node {} is replicating {} log entries", self.id, entries.len());
        Ok(self.state.lock().await.append(entries))
    }

    /// Discard uncommitted entries from `from` onwards
    ///
    /// Used to roll back an append that did not reach a quorum.
    pub async fn truncate_uncommitted(&self, from: LogIndex) -> usize {
        let dropped = self.state.lock().await.truncate_uncommitted(from);
        if dropped > 0 {
            tracing::debug!("Node {} dropped {} uncommitted log entries", self.id, dropped);
        }
        dropped
    }

    /// Mark the log committed up to `index`
    pub async fn advance_commit_index(&self, index: LogIndex) -> Result<LogIndex> {
        self.ensure_running()?;
        Ok(self.state.lock().await.advance_commit_index(index))
    }

    /// Apply committed entries to a store, in log order
    ///
    /// Returns the number of entries applied. A store failure stops at the
    /// failing entry, which is retried on the next call.
    pub async fn apply_committed_entries(&self, store: &dyn RecordStore) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut applied = 0;

        while let Some(entry) = state.next_committed().cloned() {
            store.create_table(&entry.table).await?;
            store.insert_record(&entry.table, entry.record_id, &entry.record).await?;
            state.mark_applied(entry.index);
            applied += 1;

            tracing::debug!(
                "Node {} applied entry {} (record {}) to {}",
                self.id,
                entry.index,
                entry.record_id,
                entry.table
            );
        }

        Ok(applied)
    }

    /// Snapshot the node's state
    pub async fn status(&self) -> NodeStatus {
        let state = self.state.lock().await;
        NodeStatus {
            id: self.id,
            role: state.role(),
            term: state.current_term(),
            voted_for: state.voted_for(),
            leader_id: state.leader_id(),
            log_len: state.last_log_index(),
            commit_index: state.commit_index(),
            last_applied: state.last_applied(),
            running: self.task.lock().await.is_some() && !self.is_stopped(),
            joined_at: self.joined_at,
        }
    }

    /// Copy of the node's log
    pub async fn log(&self) -> Vec<LogEntry> {
        self.state.lock().await.log().to_vec()
    }
}
