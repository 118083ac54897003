//! Message delivery seam.
//!
//! Consensus code sends through [`QuorumTransport`] and never waits for
//! delivery; the protocol tolerates loss, so sends are fire-and-forget.
//! Broadcasts include the sender itself. The loopback delivery is what
//! lets a proposer learn its own chosen values through the same code path
//! as everyone else.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::trace;

use crate::{Envelope, NodeId, Quorum};

pub trait QuorumTransport: Send {
    /// Best-effort send to a single node.
    fn send(&mut self, to: NodeId, envelope: Envelope);

    /// Best-effort send to every member of `quorum`, including this node.
    fn broadcast(&mut self, quorum: &Quorum, envelope: Envelope) {
        for &node in quorum.nodes() {
            self.send(node, envelope.clone());
        }
    }
}

/// In-process mesh of unbounded channels, one inbox per node.
///
/// Used by tests and single-process embeddings; networked deployments
/// implement [`QuorumTransport`] over their connection layer instead.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    peers: HashMap<NodeId, mpsc::UnboundedSender<Envelope>>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its inbox.
    pub fn register(&mut self, node: NodeId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(node, tx);
        rx
    }

    pub fn connect(&mut self, node: NodeId, inbox: mpsc::UnboundedSender<Envelope>) {
        self.peers.insert(node, inbox);
    }

    /// Simulate a network partition from this node's point of view.
    pub fn disconnect(&mut self, node: NodeId) {
        self.peers.remove(&node);
    }
}

impl QuorumTransport for ChannelTransport {
    fn send(&mut self, to: NodeId, envelope: Envelope) {
        match self.peers.get(&to) {
            Some(tx) => {
                if tx.send(envelope).is_err() {
                    trace!(%to, "peer inbox closed, dropping message");
                }
            }
            None => trace!(%to, "no route to peer, dropping message"),
        }
    }
}
