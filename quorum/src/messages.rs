//! Replication protocol messages.
//!
//! Three sub-protocols share the cluster transport, multiplexed by a
//! one-byte protocol id: `'P'` Paxos rounds, `'L'` leadership leases,
//! `'C'` bulk catchup. Each message is a sum type with one variant per
//! wire subtype, carrying only its relevant fields.

use bytes::Bytes;

use crate::{NodeId, PaxosId, ProposalId, QuorumId, RunId, ShardId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One Paxos round message for a single log position.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PaxosMessage {
    /// Phase 1a: claim a round with a fresh proposal id.
    PrepareRequest {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    /// Phase 1b: a higher proposal was already promised.
    PrepareRejected {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        promised_proposal_id: ProposalId,
    },
    /// Phase 1b: promised, and a value was previously accepted; the
    /// proposer must re-propose it.
    PreparePreviouslyAccepted {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        accepted_proposal_id: ProposalId,
        run_id: RunId,
        value: Bytes,
    },
    /// Phase 1b: promised, nothing accepted yet.
    PrepareCurrentlyOpen {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    /// Phase 2a: ask acceptors to accept a value.
    ProposeRequest {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        run_id: RunId,
        value: Bytes,
    },
    ProposeRejected {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeAccepted {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    /// A majority accepted `proposal_id`; receivers holding that accepted
    /// value locally can mark it chosen without the value on the wire.
    LearnProposal {
        paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    /// The chosen value itself, for receivers that missed the round.
    /// `run_id` is carried for wire compatibility and is always zero.
    LearnValue {
        paxos_id: PaxosId,
        node_id: NodeId,
        run_id: RunId,
        value: Bytes,
    },
    /// Ask a peer what was chosen at `paxos_id`.
    RequestChosen { paxos_id: PaxosId, node_id: NodeId },
    /// The sender no longer has the requested round; the receiver must
    /// fall back to bulk catchup.
    StartCatchup { paxos_id: PaxosId, node_id: NodeId },
}

impl PaxosMessage {
    #[must_use]
    pub fn paxos_id(&self) -> PaxosId {
        match self {
            Self::PrepareRequest { paxos_id, .. }
            | Self::PrepareRejected { paxos_id, .. }
            | Self::PreparePreviouslyAccepted { paxos_id, .. }
            | Self::PrepareCurrentlyOpen { paxos_id, .. }
            | Self::ProposeRequest { paxos_id, .. }
            | Self::ProposeRejected { paxos_id, .. }
            | Self::ProposeAccepted { paxos_id, .. }
            | Self::LearnProposal { paxos_id, .. }
            | Self::LearnValue { paxos_id, .. }
            | Self::RequestChosen { paxos_id, .. }
            | Self::StartCatchup { paxos_id, .. } => *paxos_id,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::PrepareRequest { node_id, .. }
            | Self::PrepareRejected { node_id, .. }
            | Self::PreparePreviouslyAccepted { node_id, .. }
            | Self::PrepareCurrentlyOpen { node_id, .. }
            | Self::ProposeRequest { node_id, .. }
            | Self::ProposeRejected { node_id, .. }
            | Self::ProposeAccepted { node_id, .. }
            | Self::LearnProposal { node_id, .. }
            | Self::LearnValue { node_id, .. }
            | Self::RequestChosen { node_id, .. }
            | Self::StartCatchup { node_id, .. } => *node_id,
        }
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::PrepareRequest { .. } | Self::ProposeRequest { .. }
        )
    }

    #[must_use]
    pub fn is_prepare_response(&self) -> bool {
        matches!(
            self,
            Self::PrepareRejected { .. }
                | Self::PreparePreviouslyAccepted { .. }
                | Self::PrepareCurrentlyOpen { .. }
        )
    }

    #[must_use]
    pub fn is_propose_response(&self) -> bool {
        matches!(
            self,
            Self::ProposeRejected { .. } | Self::ProposeAccepted { .. }
        )
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.is_prepare_response() || self.is_propose_response()
    }

    #[must_use]
    pub fn is_learn(&self) -> bool {
        matches!(self, Self::LearnProposal { .. } | Self::LearnValue { .. })
    }
}

/// One leadership-lease round message.
///
/// Lease rounds are not tied to a log position; `paxos_id` appears only in
/// the prepare request so acceptors can refuse leadership to stale replicas.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LeaseMessage {
    PrepareRequest {
        node_id: NodeId,
        proposal_id: ProposalId,
        paxos_id: PaxosId,
    },
    PrepareRejected {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    PreparePreviouslyAccepted {
        node_id: NodeId,
        proposal_id: ProposalId,
        accepted_proposal_id: ProposalId,
        lease_owner: NodeId,
        duration: u64,
    },
    PrepareCurrentlyOpen {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeRequest {
        node_id: NodeId,
        proposal_id: ProposalId,
        lease_owner: NodeId,
        duration: u64,
    },
    ProposeRejected {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    ProposeAccepted {
        node_id: NodeId,
        proposal_id: ProposalId,
    },
    /// The lease is granted. `local_expire_time` is meaningful only to the
    /// owner (measured on the grantor's own clock); everyone else derives a
    /// conservative expiry from `duration`.
    LearnChosen {
        node_id: NodeId,
        lease_owner: NodeId,
        duration: u64,
        local_expire_time: u64,
    },
}

impl LeaseMessage {
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::PrepareRequest { node_id, .. }
            | Self::PrepareRejected { node_id, .. }
            | Self::PreparePreviouslyAccepted { node_id, .. }
            | Self::PrepareCurrentlyOpen { node_id, .. }
            | Self::ProposeRequest { node_id, .. }
            | Self::ProposeRejected { node_id, .. }
            | Self::ProposeAccepted { node_id, .. }
            | Self::LearnChosen { node_id, .. } => *node_id,
        }
    }

    #[must_use]
    pub fn proposal_id(&self) -> Option<ProposalId> {
        match self {
            Self::PrepareRequest { proposal_id, .. }
            | Self::PrepareRejected { proposal_id, .. }
            | Self::PreparePreviouslyAccepted { proposal_id, .. }
            | Self::PrepareCurrentlyOpen { proposal_id, .. }
            | Self::ProposeRequest { proposal_id, .. }
            | Self::ProposeRejected { proposal_id, .. }
            | Self::ProposeAccepted { proposal_id, .. } => Some(*proposal_id),
            Self::LearnChosen { .. } => None,
        }
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::PrepareRequest { .. } | Self::ProposeRequest { .. }
        )
    }

    #[must_use]
    pub fn is_prepare_response(&self) -> bool {
        matches!(
            self,
            Self::PrepareRejected { .. }
                | Self::PreparePreviouslyAccepted { .. }
                | Self::PrepareCurrentlyOpen { .. }
        )
    }

    #[must_use]
    pub fn is_propose_response(&self) -> bool {
        matches!(
            self,
            Self::ProposeRejected { .. } | Self::ProposeAccepted { .. }
        )
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.is_prepare_response() || self.is_propose_response()
    }
}

/// Bulk snapshot transfer for a far-behind replica.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CatchupMessage {
    /// Lagging node asks the lease owner for a snapshot.
    Request { node_id: NodeId, quorum_id: QuorumId },
    /// Start of one shard's records; the receiver drops its local copy.
    BeginShard { shard_id: ShardId },
    Set { key: Bytes, value: Bytes },
    Delete { key: Bytes },
    /// End of transfer: the snapshot reflects the log up to `paxos_id`.
    Commit { paxos_id: PaxosId },
    Abort,
}

/// One message of any sub-protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QuorumMessage {
    Paxos(PaxosMessage),
    Lease(LeaseMessage),
    Catchup(CatchupMessage),
}

impl From<PaxosMessage> for QuorumMessage {
    fn from(msg: PaxosMessage) -> Self {
        Self::Paxos(msg)
    }
}

impl From<LeaseMessage> for QuorumMessage {
    fn from(msg: LeaseMessage) -> Self {
        Self::Lease(msg)
    }
}

impl From<CatchupMessage> for QuorumMessage {
    fn from(msg: CatchupMessage) -> Self {
        Self::Catchup(msg)
    }
}

/// A routed message as it travels the cluster transport.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Envelope {
    pub quorum_id: QuorumId,
    pub message: QuorumMessage,
}
