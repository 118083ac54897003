//! Proposer half of one Paxos round.
//!
//! Drives a value through prepare and propose phases against the current
//! membership. The proposer holds no durable state; a restart simply
//! begins a new prepare with a higher proposal id. In multi-paxos mode
//! the first proposal of a round skips the prepare phase entirely.

use bytes::Bytes;
use tracing::debug;

use crate::{
    Envelope, PaxosId, PaxosMessage, ProposalId, Quorum, QuorumId, QuorumTransport,
    ReplicationConfig, Vote,
};

#[derive(Debug)]
pub struct PaxosProposer {
    config: ReplicationConfig,
    quorum_id: QuorumId,
    timeout: u64,
    paxos_id: PaxosId,
    preparing: bool,
    proposing: bool,
    multi: bool,
    learn_sent: bool,
    num_proposals: u64,
    proposal_id: ProposalId,
    highest_received_proposal_id: ProposalId,
    highest_promised_proposal_id: ProposalId,
    value: Bytes,
    vote: Option<Vote>,
    deadline: Option<u64>,
}

impl PaxosProposer {
    #[must_use]
    pub fn new(config: ReplicationConfig, quorum_id: QuorumId, timeout: u64) -> Self {
        Self {
            config,
            quorum_id,
            timeout,
            paxos_id: 0,
            preparing: false,
            proposing: false,
            multi: false,
            learn_sent: false,
            num_proposals: 0,
            proposal_id: ProposalId::ZERO,
            highest_received_proposal_id: ProposalId::ZERO,
            highest_promised_proposal_id: ProposalId::ZERO,
            value: Bytes::new(),
            vote: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.preparing || self.proposing
    }

    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// Skip the prepare phase for the next proposal of this round. Only
    /// valid while this node holds the lease and learned the previous
    /// round from itself.
    pub fn set_multi(&mut self, multi: bool) {
        self.multi = multi;
    }

    #[must_use]
    pub fn learn_sent(&self) -> bool {
        self.learn_sent
    }

    /// Proposals started in the current round.
    #[must_use]
    pub fn num_proposals(&self) -> u64 {
        self.num_proposals
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// Abandon any round in progress.
    pub fn stop(&mut self) {
        self.preparing = false;
        self.proposing = false;
        self.vote = None;
        self.deadline = None;
    }

    /// Reset per-round state for a new log position.
    pub fn move_to_round(&mut self, paxos_id: PaxosId) {
        self.stop();
        self.paxos_id = paxos_id;
        self.num_proposals = 0;
        self.learn_sent = false;
        self.highest_received_proposal_id = ProposalId::ZERO;
        self.value = Bytes::new();
    }

    /// Start driving `value` to consensus at the current round.
    pub fn propose(
        &mut self,
        value: Bytes,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        now: u64,
    ) {
        debug_assert!(!self.is_active());
        self.value = value;
        if self.multi && self.num_proposals == 0 {
            self.num_proposals += 1;
            self.start_proposing(quorum, transport, now);
        } else {
            self.start_preparing(quorum, transport, now);
        }
    }

    pub fn on_prepare_response(
        &mut self,
        msg: &PaxosMessage,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        now: u64,
    ) {
        let Some(proposal_id) = prepare_response_proposal_id(msg) else {
            return;
        };
        if !self.preparing || proposal_id != self.proposal_id {
            return;
        }
        let Some(vote) = &mut self.vote else { return };
        match msg {
            PaxosMessage::PrepareRejected {
                node_id,
                promised_proposal_id,
                ..
            } => {
                if *promised_proposal_id > self.highest_promised_proposal_id {
                    self.highest_promised_proposal_id = *promised_proposal_id;
                }
                vote.register_rejected(*node_id);
            }
            PaxosMessage::PreparePreviouslyAccepted {
                node_id,
                accepted_proposal_id,
                value,
                ..
            } => {
                vote.register_accepted(*node_id);
                // `>=` so a value accepted under our own current id (from a
                // retransmitted propose) still wins over an older adoption.
                if *accepted_proposal_id >= self.highest_received_proposal_id {
                    self.highest_received_proposal_id = *accepted_proposal_id;
                    self.value = value.clone();
                }
            }
            PaxosMessage::PrepareCurrentlyOpen { node_id, .. } => {
                vote.register_accepted(*node_id);
            }
            _ => return,
        }

        let rejected = vote.is_rejected();
        let accepted = vote.is_accepted();
        let complete = vote.is_complete();
        if rejected {
            self.start_preparing(quorum, transport, now);
        } else if accepted {
            self.start_proposing(quorum, transport, now);
        } else if complete {
            // every node answered but neither side reached its threshold
            self.start_preparing(quorum, transport, now);
        }
    }

    pub fn on_propose_response(
        &mut self,
        msg: &PaxosMessage,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        now: u64,
    ) {
        let Some(proposal_id) = propose_response_proposal_id(msg) else {
            return;
        };
        if !self.proposing || proposal_id != self.proposal_id {
            return;
        }
        let Some(vote) = &mut self.vote else { return };
        match msg {
            PaxosMessage::ProposeAccepted { node_id, .. } => vote.register_accepted(*node_id),
            PaxosMessage::ProposeRejected { node_id, .. } => vote.register_rejected(*node_id),
            _ => return,
        }

        let accepted = vote.is_accepted();
        let rejected = vote.is_rejected();
        let complete = vote.is_complete();
        if accepted {
            debug!(
                paxos_id = self.paxos_id,
                proposal_id = self.proposal_id.0,
                "value chosen, announcing"
            );
            self.learn_sent = true;
            let msg = PaxosMessage::LearnProposal {
                paxos_id: self.paxos_id,
                node_id: self.config.node_id,
                proposal_id: self.proposal_id,
            };
            self.broadcast(quorum, transport, msg);
            self.stop();
        } else if rejected || complete {
            self.start_preparing(quorum, transport, now);
        }
    }

    /// Restart the round if its phase timer expired.
    pub fn on_timeout(&mut self, quorum: &Quorum, transport: &mut dyn QuorumTransport, now: u64) {
        if !self.is_active() {
            return;
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            debug!(
                paxos_id = self.paxos_id,
                proposal_id = self.proposal_id.0,
                "round timed out, restarting prepare"
            );
            self.start_preparing(quorum, transport, now);
        }
    }

    /// Push an expired phase deadline back without restarting the round,
    /// used while the embedder has replication paused.
    pub fn extend_timeout(&mut self, now: u64) {
        if self.is_active() && self.deadline.is_some_and(|deadline| now >= deadline) {
            self.deadline = Some(now + self.timeout);
        }
    }

    fn start_preparing(
        &mut self,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        now: u64,
    ) {
        self.proposing = false;
        self.preparing = true;
        self.num_proposals += 1;
        let floor = self.proposal_id.max(self.highest_promised_proposal_id);
        self.proposal_id = self.config.next_proposal_id(floor);
        self.highest_received_proposal_id = ProposalId::ZERO;
        self.vote = Some(quorum.new_vote());
        self.deadline = Some(now + self.timeout);
        debug!(
            paxos_id = self.paxos_id,
            proposal_id = self.proposal_id.0,
            "starting prepare phase"
        );
        let msg = PaxosMessage::PrepareRequest {
            paxos_id: self.paxos_id,
            node_id: self.config.node_id,
            proposal_id: self.proposal_id,
        };
        self.broadcast(quorum, transport, msg);
    }

    fn start_proposing(
        &mut self,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        now: u64,
    ) {
        self.preparing = false;
        self.proposing = true;
        self.vote = Some(quorum.new_vote());
        self.deadline = Some(now + self.timeout);
        debug!(
            paxos_id = self.paxos_id,
            proposal_id = self.proposal_id.0,
            "starting propose phase"
        );
        let msg = PaxosMessage::ProposeRequest {
            paxos_id: self.paxos_id,
            node_id: self.config.node_id,
            proposal_id: self.proposal_id,
            run_id: self.config.run_id,
            value: self.value.clone(),
        };
        self.broadcast(quorum, transport, msg);
    }

    fn broadcast(
        &self,
        quorum: &Quorum,
        transport: &mut dyn QuorumTransport,
        message: PaxosMessage,
    ) {
        transport.broadcast(
            quorum,
            Envelope {
                quorum_id: self.quorum_id,
                message: message.into(),
            },
        );
    }
}

fn prepare_response_proposal_id(msg: &PaxosMessage) -> Option<ProposalId> {
    match msg {
        PaxosMessage::PrepareRejected { proposal_id, .. }
        | PaxosMessage::PreparePreviouslyAccepted { proposal_id, .. }
        | PaxosMessage::PrepareCurrentlyOpen { proposal_id, .. } => Some(*proposal_id),
        _ => None,
    }
}

fn propose_response_proposal_id(msg: &PaxosMessage) -> Option<ProposalId> {
    match msg {
        PaxosMessage::ProposeRejected { proposal_id, .. }
        | PaxosMessage::ProposeAccepted { proposal_id, .. } => Some(*proposal_id),
        _ => None,
    }
}
