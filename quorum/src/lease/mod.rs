//! Lease-based leadership election.
//!
//! Nodes compete for a time-bounded, majority-granted lease; the owner
//! may run multi-paxos and serve consistent reads until it expires.
//! Clocks only need comparable rates, not synchronization: every expiry
//! is computed from durations measured on the local clock.
//!
//! The facade multiplexes proposer, acceptor and learner over one
//! message stream, filters leadership claims from stale replicas, and
//! pushes ownership changes into the [`QuorumContext`].

mod acceptor;
mod learner;
mod proposer;

pub use acceptor::LeaseAcceptor;
pub use learner::LeaseLearner;
pub use proposer::LeaseProposer;

use tracing::info;

use crate::{
    Envelope, LeaseMessage, NodeId, QuorumConfig, QuorumContext, QuorumId, ReplicationConfig,
};

#[derive(Debug)]
pub struct PaxosLease {
    node_id: NodeId,
    acquire_lease: bool,
    proposer: LeaseProposer,
    acceptor: LeaseAcceptor,
    learner: LeaseLearner,
}

impl PaxosLease {
    #[must_use]
    pub fn new(config: ReplicationConfig, quorum_id: QuorumId, timing: &QuorumConfig) -> Self {
        Self {
            node_id: config.node_id,
            acquire_lease: false,
            proposer: LeaseProposer::new(
                config,
                quorum_id,
                timing.acquire_lease_timeout,
                timing.max_lease_time,
                timing.lease_safety_margin,
            ),
            acceptor: LeaseAcceptor::new(config.node_id),
            learner: LeaseLearner::new(config.node_id, timing.lease_safety_margin),
        }
    }

    /// Start competing for the lease, and keep competing (or extending)
    /// until [`stop_acquiring`](Self::stop_acquiring).
    pub fn acquire_lease(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        self.acquire_lease = true;
        if ctx.quorum().is_single_member() {
            // nobody to compete with
            ctx.on_learn_lease(self.node_id);
            return;
        }
        if !self.proposer.is_active() {
            let quorum = ctx.quorum().clone();
            let paxos_id = ctx.paxos_id();
            self.proposer
                .start_preparing(&quorum, ctx.transport(), paxos_id, now);
        }
    }

    pub fn stop_acquiring(&mut self) {
        self.acquire_lease = false;
        self.proposer.stop();
    }

    #[must_use]
    pub fn is_lease_owner(&self, now: u64) -> bool {
        self.learner.is_lease_owner(now)
    }

    #[must_use]
    pub fn lease_owner(&self, now: u64) -> Option<NodeId> {
        self.learner.lease_owner(now)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.proposer.next_deadline(),
            self.acceptor.next_deadline(),
            self.learner.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn on_message(&mut self, msg: &LeaseMessage, ctx: &mut dyn QuorumContext, now: u64) {
        if msg.is_request() && msg.node_id() != self.node_id {
            if let Some(proposal_id) = msg.proposal_id() {
                self.proposer.observe_proposal_id(proposal_id);
            }
        }
        match msg {
            LeaseMessage::PrepareRequest {
                node_id: sender,
                proposal_id,
                paxos_id,
            } => {
                // a replica behind on the log must not become leader,
                // unless it already is and is merely extending
                if *paxos_id < ctx.paxos_id() && self.learner.lease_owner(now) != Some(*sender) {
                    return;
                }
                let reply = self.acceptor.on_prepare_request(*proposal_id, now);
                self.reply(*sender, reply, ctx);
            }
            LeaseMessage::ProposeRequest {
                node_id: sender,
                proposal_id,
                lease_owner,
                duration,
            } => {
                let reply = self
                    .acceptor
                    .on_propose_request(*proposal_id, *lease_owner, *duration, now);
                self.reply(*sender, reply, ctx);
            }
            msg if msg.is_prepare_response() => {
                let quorum = ctx.quorum().clone();
                let paxos_id = ctx.paxos_id();
                self.proposer
                    .on_prepare_response(msg, &quorum, ctx.transport(), paxos_id, now);
            }
            msg if msg.is_propose_response() => {
                let quorum = ctx.quorum().clone();
                let paxos_id = ctx.paxos_id();
                self.proposer
                    .on_propose_response(msg, &quorum, ctx.transport(), paxos_id, now);
            }
            msg @ LeaseMessage::LearnChosen { .. } => {
                if let Some(owner) = self.learner.on_learn_chosen(msg, now) {
                    info!(%owner, "lease learned");
                    ctx.on_learn_lease(owner);
                    if owner != self.node_id {
                        // back off until their lease runs out
                        self.proposer.stop();
                    }
                }
            }
            _ => {}
        }
    }

    pub fn on_timer(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        self.acceptor.expire_stale(now);
        if self.learner.take_expired(now) {
            info!("lease expired");
            ctx.on_lease_timeout();
            if self.acquire_lease && !self.proposer.is_active() {
                let quorum = ctx.quorum().clone();
                let paxos_id = ctx.paxos_id();
                self.proposer
                    .start_preparing(&quorum, ctx.transport(), paxos_id, now);
            }
        }
        if self.acquire_lease {
            let quorum = ctx.quorum().clone();
            let paxos_id = ctx.paxos_id();
            self.proposer
                .on_timeout(&quorum, ctx.transport(), paxos_id, now);
        }
    }

    fn reply(&self, to: NodeId, msg: LeaseMessage, ctx: &mut dyn QuorumContext) {
        let quorum_id = ctx.quorum_id();
        ctx.transport().send(
            to,
            Envelope {
                quorum_id,
                message: msg.into(),
            },
        );
    }
}
