//! In-process Transport
//!
//! Routes protocol messages between node tasks over bounded channels.
//! The set of registered inboxes is the cluster membership used for
//! quorum sizing. Delivery never blocks: a full or closed inbox drops
//! the message, which the election protocol tolerates.

use std::collections::BTreeMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use super::protocol::{Envelope, Message};
use super::state::quorum;
use crate::types::NodeId;

/// Message router keyed by node ID
#[derive(Default)]
pub struct Transport {
    inboxes: RwLock<BTreeMap<NodeId, mpsc::Sender<Envelope>>>,
}

impl Transport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's inbox, replacing any previous one
    pub async fn register(&self, node_id: NodeId, inbox: mpsc::Sender<Envelope>) {
        self.inboxes.write().await.insert(node_id, inbox);
    }

    /// Remove a node from the membership
    pub async fn unregister(&self, node_id: NodeId) -> bool {
        self.inboxes.write().await.remove(&node_id).is_some()
    }

    /// All registered node IDs in order
    pub async fn members(&self) -> Vec<NodeId> {
        self.inboxes.read().await.keys().copied().collect()
    }

    /// Number of registered nodes
    pub async fn size(&self) -> usize {
        self.inboxes.read().await.len()
    }

    /// Majority of the current membership
    pub async fn quorum_size(&self) -> usize {
        quorum(self.size().await)
    }

    /// Deliver a message to one node
    ///
    /// Returns false if the message was dropped.
    pub async fn send(&self, from: NodeId, to: NodeId, message: Message) -> bool {
        let inboxes = self.inboxes.read().await;
        match inboxes.get(&to) {
            Some(inbox) => Self::deliver(inbox, from, to, message),
            None => {
                tracing::debug!("Dropping {} from {} to unknown node {}", message.kind(), from, to);
                false
            }
        }
    }

    /// Deliver a message to every node except the sender
    ///
    /// Returns the number of nodes the message reached.
    pub async fn broadcast(&self, from: NodeId, message: Message) -> usize {
        let inboxes = self.inboxes.read().await;
        inboxes
            .iter()
            .filter(|(id, _)| **id != from)
            .filter(|(id, inbox)| Self::deliver(inbox, from, **id, message.clone()))
            .count()
    }

    fn deliver(inbox: &mpsc::Sender<Envelope>, from: NodeId, to: NodeId, message: Message) -> bool {
        let kind = message.kind();
        match inbox.try_send(Envelope { from, message }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Inbox of node {} is full, dropping {} from {}", to, kind, from);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Node {} is not receiving, dropping {} from {}", to, kind, from);
                false
            }
        }
    }
}
