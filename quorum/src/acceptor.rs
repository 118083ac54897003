//! Acceptor half of one Paxos round.
//!
//! The acceptor is the only consensus role whose state must be durable:
//! every promise and acceptance is written to the store before the
//! response leaves this node. The surrounding log guarantees that only
//! messages for the acceptor's current round reach it.

use bytes::Bytes;

use crate::{
    AcceptedRecord, AcceptorRecord, NodeId, PaxosId, PaxosMessage, ProposalId, QuorumStore, RunId,
};

#[derive(Debug)]
pub struct PaxosAcceptor {
    node_id: NodeId,
    paxos_id: PaxosId,
    promised_proposal_id: ProposalId,
    accepted: Option<AcceptedRecord>,
}

impl PaxosAcceptor {
    /// Restore acceptor state from the store, or start fresh at round 0.
    #[must_use]
    pub fn restore(node_id: NodeId, store: &dyn QuorumStore) -> Self {
        let record = store.acceptor_record().unwrap_or_default();
        Self {
            node_id,
            paxos_id: record.paxos_id,
            promised_proposal_id: record.promised_proposal_id,
            accepted: record.accepted,
        }
    }

    #[must_use]
    pub fn paxos_id(&self) -> PaxosId {
        self.paxos_id
    }

    /// Accepted value of the current round, if any. The log consults this
    /// when a `LearnProposal` arrives: the chosen value is only learnable
    /// locally if this acceptor accepted under the same proposal id.
    #[must_use]
    pub fn accepted(&self) -> Option<&AcceptedRecord> {
        self.accepted.as_ref()
    }

    /// Install a value learned whole off the wire, so the round can close
    /// through the same path as a locally accepted one. The run id is zero
    /// because a relayed value never counts toward multi-paxos.
    pub fn install_chosen(&mut self, value: Bytes, store: &mut dyn QuorumStore) {
        self.accepted = Some(AcceptedRecord {
            proposal_id: self.promised_proposal_id,
            run_id: RunId(0),
            value,
        });
        self.persist(store);
    }

    /// Discard round state and start the given round.
    pub fn move_to_round(&mut self, paxos_id: PaxosId, store: &mut dyn QuorumStore) {
        self.paxos_id = paxos_id;
        self.promised_proposal_id = ProposalId::ZERO;
        self.accepted = None;
        self.persist(store);
    }

    pub fn on_prepare_request(
        &mut self,
        proposal_id: ProposalId,
        store: &mut dyn QuorumStore,
    ) -> PaxosMessage {
        if proposal_id < self.promised_proposal_id {
            return PaxosMessage::PrepareRejected {
                paxos_id: self.paxos_id,
                node_id: self.node_id,
                proposal_id,
                promised_proposal_id: self.promised_proposal_id,
            };
        }
        self.promised_proposal_id = proposal_id;
        self.persist(store);
        match &self.accepted {
            None => PaxosMessage::PrepareCurrentlyOpen {
                paxos_id: self.paxos_id,
                node_id: self.node_id,
                proposal_id,
            },
            Some(accepted) => PaxosMessage::PreparePreviouslyAccepted {
                paxos_id: self.paxos_id,
                node_id: self.node_id,
                proposal_id,
                accepted_proposal_id: accepted.proposal_id,
                run_id: accepted.run_id,
                value: accepted.value.clone(),
            },
        }
    }

    pub fn on_propose_request(
        &mut self,
        proposal_id: ProposalId,
        run_id: RunId,
        value: Bytes,
        store: &mut dyn QuorumStore,
    ) -> PaxosMessage {
        if proposal_id < self.promised_proposal_id {
            return PaxosMessage::ProposeRejected {
                paxos_id: self.paxos_id,
                node_id: self.node_id,
                proposal_id,
            };
        }
        self.accepted = Some(AcceptedRecord {
            proposal_id,
            run_id,
            value,
        });
        self.persist(store);
        PaxosMessage::ProposeAccepted {
            paxos_id: self.paxos_id,
            node_id: self.node_id,
            proposal_id,
        }
    }

    fn persist(&self, store: &mut dyn QuorumStore) {
        store.save_acceptor_record(&AcceptorRecord {
            paxos_id: self.paxos_id,
            promised_proposal_id: self.promised_proposal_id,
            accepted: self.accepted.clone(),
        });
    }
}
