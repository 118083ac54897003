//! Quorum membership and per-round vote tallies.

use std::collections::BTreeSet;

use crate::NodeId;

/// Membership set of one replication group.
///
/// Simple majority vote, the default for Paxos as described by Lamport.
/// A single-member quorum short-circuits consensus entirely (see
/// `ReplicatedLog`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Quorum {
    nodes: Vec<NodeId>,
}

impl Quorum {
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut quorum = Self::default();
        for node in nodes {
            quorum.add_node(node);
        }
        quorum
    }

    pub fn add_node(&mut self, node: NodeId) {
        if !self.is_member(node) {
            self.nodes.push(node);
        }
    }

    pub fn remove_node(&mut self, node: NodeId) {
        self.nodes.retain(|n| *n != node);
    }

    #[must_use]
    pub fn is_member(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[must_use]
    pub fn is_single_member(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Number of accepts required for a round to pass.
    #[must_use]
    pub fn majority(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    /// Snapshot the current membership into a fresh tally.
    ///
    /// The tally stays valid for its whole round even if membership changes
    /// mid-round; stale votes from removed nodes are simply never counted
    /// against the new membership because the snapshot is independent.
    #[must_use]
    pub fn new_vote(&self) -> Vote {
        Vote {
            members: self.nodes.clone(),
            accepted: BTreeSet::new(),
            rejected: BTreeSet::new(),
        }
    }
}

/// Accept/reject tally for one broadcast round.
///
/// Plain value type, constructed fresh per round and discarded afterwards.
/// Each member is counted at most once; the first answer wins.
#[derive(Clone, Debug)]
pub struct Vote {
    members: Vec<NodeId>,
    accepted: BTreeSet<NodeId>,
    rejected: BTreeSet<NodeId>,
}

impl Vote {
    pub fn register_accepted(&mut self, node: NodeId) {
        if self.members.contains(&node) && !self.rejected.contains(&node) {
            self.accepted.insert(node);
        }
    }

    pub fn register_rejected(&mut self, node: NodeId) {
        if self.members.contains(&node) && !self.accepted.contains(&node) {
            self.rejected.insert(node);
        }
    }

    /// A majority of the snapshot accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.accepted.len() >= self.members.len() / 2 + 1
    }

    /// Enough rejections that a majority accept is no longer possible.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejected.len() >= self.members.len().div_ceil(2)
    }

    /// Every member of the snapshot has answered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.accepted.len() + self.rejected.len() == self.members.len()
    }
}
