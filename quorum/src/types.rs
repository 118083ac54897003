//! Core identifier types shared across the replication stack.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies a node within a cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Identifies one replication group (the config quorum or one shard quorum).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QuorumId(pub u64);

impl fmt::Display for QuorumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quorum {}", self.0)
    }
}

/// Identifies a shard inside a quorum's storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShardId(pub u64);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {}", self.0)
    }
}

/// Position (slot) in a quorum's replicated log. Monotonically increasing,
/// one chosen value per position, never reused.
pub type PaxosId = u64;

/// Counter incremented on every process restart.
///
/// Embedded in every [`ProposalId`] so a restarted process can never reuse
/// a proposal identifier it handed out before crashing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunId(pub u64);

/// Round number totally ordering competing proposals within one paxosID.
///
/// Packed as `counter << 32 | run_id << 8 | node_id` (32-bit round counter,
/// 24-bit runID, 8-bit nodeID), so two distinct `(run_id, node_id)` pairs
/// can never produce equal identifiers even at equal counters, and
/// [`ProposalId::next`] is strictly increasing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProposalId(pub u64);

const WIDTH_NODE_ID: u32 = 8;
const WIDTH_RUN_ID: u32 = 24;

impl ProposalId {
    pub const ZERO: Self = Self(0);

    /// The next proposal identifier after `self` for the given proposer
    /// identity. Strictly greater than `self` for any identity.
    #[must_use]
    pub fn next(self, run_id: RunId, node_id: NodeId) -> Self {
        let counter = (self.0 >> (WIDTH_NODE_ID + WIDTH_RUN_ID)) + 1;
        let middle = (run_id.0 & ((1 << WIDTH_RUN_ID) - 1)) << WIDTH_NODE_ID;
        let right = node_id.0 & ((1 << WIDTH_NODE_ID) - 1);
        Self((counter << (WIDTH_NODE_ID + WIDTH_RUN_ID)) | middle | right)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_increasing() {
        let mut id = ProposalId::ZERO;
        for _ in 0..1000 {
            let next = id.next(RunId(3), NodeId(1));
            assert!(next > id);
            id = next;
        }
    }

    #[test]
    fn next_dominates_foreign_ids() {
        // Catching up past an observed higher id from any other node must
        // produce something strictly greater.
        let theirs = ProposalId::ZERO
            .next(RunId(9), NodeId(7))
            .next(RunId(9), NodeId(7));
        let mine = theirs.next(RunId(1), NodeId(2));
        assert!(mine > theirs);
    }

    #[test]
    fn distinct_identities_never_collide() {
        let a = ProposalId::ZERO.next(RunId(1), NodeId(1));
        let b = ProposalId::ZERO.next(RunId(1), NodeId(2));
        let c = ProposalId::ZERO.next(RunId(2), NodeId(1));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn wide_run_ids_are_masked_not_mixed() {
        // runIDs beyond 24 bits wrap within their field instead of
        // clobbering the counter bits.
        let a = ProposalId::ZERO.next(RunId(1 << 30), NodeId(1));
        let b = ProposalId::ZERO.next(RunId(0), NodeId(1));
        assert_eq!(a.0 >> 32, b.0 >> 32);
    }
}
