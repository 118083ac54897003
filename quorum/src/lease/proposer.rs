//! Proposer side of the lease protocol.
//!
//! A lease round is Paxos over "who leads, until when". Unlike log
//! rounds the value decays: an adopted lease only matters while its
//! clock is still running, and a proposer only ever proposes itself.
//! If prepare adopts another node's live lease, this proposer backs
//! off and retries after the acquire timeout.

use tracing::debug;

use crate::{
    Envelope, LeaseMessage, NodeId, PaxosId, ProposalId, Quorum, QuorumId, QuorumTransport,
    ReplicationConfig, Vote,
};

#[derive(Debug)]
pub struct LeaseProposer {
    config: ReplicationConfig,
    quorum_id: QuorumId,
    acquire_timeout: u64,
    max_lease_time: u64,
    safety_margin: u64,
    preparing: bool,
    proposing: bool,
    proposal_id: ProposalId,
    highest_observed_proposal_id: ProposalId,
    highest_received_proposal_id: ProposalId,
    candidate_owner: NodeId,
    expire_time: u64,
    vote: Option<Vote>,
    round_deadline: Option<u64>,
    extend_deadline: Option<u64>,
}

impl LeaseProposer {
    #[must_use]
    pub fn new(
        config: ReplicationConfig,
        quorum_id: QuorumId,
        acquire_timeout: u64,
        max_lease_time: u64,
        safety_margin: u64,
    ) -> Self {
        Self {
            config,
            quorum_id,
            acquire_timeout,
            max_lease_time,
            safety_margin,
            preparing: false,
            proposing: false,
            proposal_id: ProposalId::ZERO,
            highest_observed_proposal_id: ProposalId::ZERO,
            highest_received_proposal_id: ProposalId::ZERO,
            candidate_owner: config.node_id,
            expire_time: 0,
            vote: None,
            round_deadline: None,
            extend_deadline: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.preparing || self.proposing
    }

    /// Track proposal ids seen in other nodes' requests so the next
    /// prepare starts above everything already on the wire.
    pub fn observe_proposal_id(&mut self, proposal_id: ProposalId) {
        if proposal_id > self.highest_observed_proposal_id {
            self.highest_observed_proposal_id = proposal_id;
        }
    }

    pub fn stop(&mut self) {
        self.preparing = false;
        self.proposing = false;
        self.vote = None;
        self.round_deadline = None;
        self.extend_deadline = None;
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.round_deadline, self.extend_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn start_preparing(
        &mut self,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        paxos_id: PaxosId,
        now: u64,
    ) {
        self.proposing = false;
        self.preparing = true;
        self.candidate_owner = self.config.node_id;
        self.highest_received_proposal_id = ProposalId::ZERO;
        let floor = self.proposal_id.max(self.highest_observed_proposal_id);
        self.proposal_id = self.config.next_proposal_id(floor);
        self.vote = Some(quorum.new_vote());
        self.round_deadline = Some(now + self.acquire_timeout);
        self.extend_deadline = None;
        debug!(proposal_id = self.proposal_id.0, "lease prepare");
        let msg = LeaseMessage::PrepareRequest {
            node_id: self.config.node_id,
            proposal_id: self.proposal_id,
            paxos_id,
        };
        self.broadcast(quorum, transport, msg);
    }

    pub fn on_prepare_response(
        &mut self,
        msg: &LeaseMessage,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        paxos_id: PaxosId,
        now: u64,
    ) {
        if !self.preparing || msg.proposal_id() != Some(self.proposal_id) {
            return;
        }
        let Some(vote) = &mut self.vote else { return };
        match msg {
            LeaseMessage::PrepareRejected { node_id, .. } => vote.register_rejected(*node_id),
            LeaseMessage::PrepareCurrentlyOpen { node_id, .. } => vote.register_accepted(*node_id),
            LeaseMessage::PreparePreviouslyAccepted {
                node_id,
                accepted_proposal_id,
                lease_owner,
                ..
            } => {
                vote.register_accepted(*node_id);
                if *accepted_proposal_id >= self.highest_received_proposal_id {
                    self.highest_received_proposal_id = *accepted_proposal_id;
                    self.candidate_owner = *lease_owner;
                }
            }
            _ => return,
        }

        let rejected = vote.is_rejected();
        let accepted = vote.is_accepted();
        if rejected {
            self.start_preparing(quorum, transport, paxos_id, now);
        } else if accepted {
            if self.candidate_owner == self.config.node_id {
                self.start_proposing(quorum, transport, now);
            } else {
                // someone else's lease is still live; let the acquire
                // timeout retry after it runs out
                self.preparing = false;
            }
        }
    }

    fn start_proposing(&mut self, quorum: &Quorum, transport: &mut dyn QuorumTransport, now: u64) {
        self.preparing = false;
        self.proposing = true;
        self.expire_time = now + self.max_lease_time;
        self.vote = Some(quorum.new_vote());
        debug!(proposal_id = self.proposal_id.0, "lease propose");
        let msg = LeaseMessage::ProposeRequest {
            node_id: self.config.node_id,
            proposal_id: self.proposal_id,
            lease_owner: self.config.node_id,
            duration: self.max_lease_time,
        };
        self.broadcast(quorum, transport, msg);
    }

    pub fn on_propose_response(
        &mut self,
        msg: &LeaseMessage,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        paxos_id: PaxosId,
        now: u64,
    ) {
        if !self.proposing || msg.proposal_id() != Some(self.proposal_id) {
            return;
        }
        let Some(vote) = &mut self.vote else { return };
        match msg {
            LeaseMessage::ProposeAccepted { node_id, .. } => vote.register_accepted(*node_id),
            LeaseMessage::ProposeRejected { node_id, .. } => vote.register_rejected(*node_id),
            _ => return,
        }

        let accepted = vote.is_accepted();
        let rejected = vote.is_rejected();
        if accepted {
            // a win only counts while enough of the lease is left to be
            // useful after broadcast latency
            if self.expire_time > now + self.safety_margin {
                debug!(expire_time = self.expire_time, "lease won");
                let msg = LeaseMessage::LearnChosen {
                    node_id: self.config.node_id,
                    lease_owner: self.config.node_id,
                    duration: self.expire_time - now,
                    local_expire_time: self.expire_time,
                };
                self.broadcast(quorum, transport, msg);
                self.proposing = false;
                self.round_deadline = None;
                self.extend_deadline = Some(now + (self.expire_time - now) / 7);
            } else {
                self.start_preparing(quorum, transport, paxos_id, now);
            }
        } else if rejected {
            self.start_preparing(quorum, transport, paxos_id, now);
        }
    }

    /// Restart preparing when either the acquire retry or the extend
    /// timer fires. The facade gates this on wanting the lease at all.
    pub fn on_timeout(
        &mut self,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        paxos_id: PaxosId,
        now: u64,
    ) {
        let due = self.next_deadline().is_some_and(|deadline| now >= deadline);
        if due {
            self.start_preparing(quorum, transport, paxos_id, now);
        }
    }

    fn broadcast(&self, quorum: &Quorum, transport: &mut dyn QuorumTransport, msg: LeaseMessage) {
        transport.broadcast(
            quorum,
            Envelope {
                quorum_id: self.quorum_id,
                message: msg.into(),
            },
        );
    }
}
