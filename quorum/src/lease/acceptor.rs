//! Acceptor side of the lease protocol.
//!
//! Lease grants are deliberately not persisted: a restarted node has
//! been down for a while, so any lease it granted has expired in real
//! time anyway. Expiry is lazy, checked before each request is handled.

use crate::{LeaseMessage, NodeId, ProposalId};

/// A granted (accepted but not necessarily chosen) lease.
#[derive(Clone, Debug)]
struct Granted {
    proposal_id: ProposalId,
    lease_owner: NodeId,
    duration: u64,
    expire_time: u64,
}

#[derive(Debug)]
pub struct LeaseAcceptor {
    node_id: NodeId,
    promised_proposal_id: ProposalId,
    granted: Option<Granted>,
}

impl LeaseAcceptor {
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            promised_proposal_id: ProposalId::ZERO,
            granted: None,
        }
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.granted.as_ref().map(|g| g.expire_time)
    }

    /// Drop a grant whose clock ran out.
    pub fn expire_stale(&mut self, now: u64) {
        if self.granted.as_ref().is_some_and(|g| g.expire_time <= now) {
            self.granted = None;
        }
    }

    pub fn on_prepare_request(&mut self, proposal_id: ProposalId, now: u64) -> LeaseMessage {
        self.expire_stale(now);
        if proposal_id < self.promised_proposal_id {
            return LeaseMessage::PrepareRejected {
                node_id: self.node_id,
                proposal_id,
            };
        }
        self.promised_proposal_id = proposal_id;
        match &self.granted {
            None => LeaseMessage::PrepareCurrentlyOpen {
                node_id: self.node_id,
                proposal_id,
            },
            Some(granted) => LeaseMessage::PreparePreviouslyAccepted {
                node_id: self.node_id,
                proposal_id,
                accepted_proposal_id: granted.proposal_id,
                lease_owner: granted.lease_owner,
                duration: granted.duration,
            },
        }
    }

    pub fn on_propose_request(
        &mut self,
        proposal_id: ProposalId,
        lease_owner: NodeId,
        duration: u64,
        now: u64,
    ) -> LeaseMessage {
        self.expire_stale(now);
        if proposal_id < self.promised_proposal_id {
            return LeaseMessage::ProposeRejected {
                node_id: self.node_id,
                proposal_id,
            };
        }
        self.granted = Some(Granted {
            proposal_id,
            lease_owner,
            duration,
            expire_time: now + duration,
        });
        LeaseMessage::ProposeAccepted {
            node_id: self.node_id,
            proposal_id,
        }
    }
}
