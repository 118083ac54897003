//! The replicated log: multi-paxos over numbered positions.
//!
//! One Paxos round per log position. The log sequences rounds, detects
//! when this node falls behind, runs the multi-paxos fast path while
//! this node leads, and periodically appends a canary value so a silent
//! cluster still proves its majority is alive.
//!
//! Values move through the [`QuorumContext`]: `next_value` supplies the
//! leader's pending writes, `on_append` delivers every chosen value in
//! log order on every node.

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    AppendOutcome, Envelope, NodeId, PaxosAcceptor, PaxosId, PaxosMessage, PaxosProposer,
    QuorumConfig, QuorumContext, QuorumId, ReplicationConfig, RunId,
};

/// Canary value appended by an idle leader; applied by nobody.
pub const DUMMY_VALUE: &[u8] = b"dummy";

#[derive(Debug)]
pub struct ReplicatedLog {
    quorum_id: QuorumId,
    config: QuorumConfig,
    replication: ReplicationConfig,
    proposer: PaxosProposer,
    acceptor: PaxosAcceptor,
    /// Position currently being decided.
    paxos_id: PaxosId,
    waiting_on_append: bool,
    append_dummy_next: bool,
    highest_seen_paxos_id: PaxosId,
    last_request_chosen_time: Option<u64>,
    canary_deadline: Option<u64>,
    catchup_requested: bool,
}

impl ReplicatedLog {
    pub fn new(
        replication: ReplicationConfig,
        quorum_id: QuorumId,
        config: QuorumConfig,
        ctx: &mut dyn QuorumContext,
        now: u64,
    ) -> Self {
        let acceptor = PaxosAcceptor::restore(replication.node_id, ctx.database());
        // acceptor state can be ahead of the applied position after a crash
        // between choosing and applying; behind it is stale and safe to drop
        let paxos_id = ctx.paxos_id().max(acceptor.paxos_id());
        let mut proposer = PaxosProposer::new(replication, quorum_id, config.paxos_timeout);
        proposer.move_to_round(paxos_id);
        let mut acceptor = acceptor;
        if acceptor.paxos_id() < paxos_id {
            acceptor.move_to_round(paxos_id, ctx.database());
        }
        Self {
            quorum_id,
            config,
            replication,
            proposer,
            acceptor,
            paxos_id,
            waiting_on_append: false,
            append_dummy_next: false,
            highest_seen_paxos_id: 0,
            last_request_chosen_time: None,
            canary_deadline: Some(now + config.canary_timeout),
            catchup_requested: false,
        }
    }

    #[must_use]
    pub fn paxos_id(&self) -> PaxosId {
        self.paxos_id
    }

    #[must_use]
    pub fn highest_seen_paxos_id(&self) -> PaxosId {
        self.highest_seen_paxos_id
    }

    #[must_use]
    pub fn is_multi_paxos_enabled(&self) -> bool {
        self.proposer.is_multi()
    }

    #[must_use]
    pub fn is_waiting_on_append(&self) -> bool {
        self.waiting_on_append
    }

    #[must_use]
    pub fn is_appending(&self, ctx: &dyn QuorumContext) -> bool {
        ctx.is_lease_owner() && self.proposer.num_proposals() > 0
    }

    /// A replication round (or catchup) left this node behind; ask the
    /// lease owner what was chosen.
    pub fn try_catchup(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        if ctx.is_lease_known() && self.highest_seen_paxos_id > self.paxos_id {
            if let Some(owner) = ctx.lease_owner() {
                self.request_chosen(owner, ctx, now);
            }
        }
    }

    /// Stop driving rounds, e.g. on lease loss or while catching up.
    pub fn stop(&mut self) {
        self.proposer.stop();
    }

    /// True when a bulk catchup became necessary since the last call.
    pub fn take_catchup_request(&mut self) -> bool {
        std::mem::take(&mut self.catchup_requested)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        [self.proposer.next_deadline(), self.canary_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Track the log position a peer claims, for lag detection. Called for
    /// every message of every sub-protocol that carries a position.
    pub fn register_paxos_id(
        &mut self,
        paxos_id: PaxosId,
        from: NodeId,
        ctx: &mut dyn QuorumContext,
        now: u64,
    ) {
        if paxos_id > self.highest_seen_paxos_id {
            self.highest_seen_paxos_id = paxos_id;
        }
        if paxos_id > self.paxos_id {
            self.request_chosen(from, ctx, now);
        }
        if paxos_id > self.paxos_id + self.config.catchup_threshold {
            debug!(
                behind = paxos_id - self.paxos_id,
                "lag exceeds replay threshold, requesting bulk catchup"
            );
            self.catchup_requested = true;
        }
    }

    pub fn on_message(&mut self, msg: &PaxosMessage, ctx: &mut dyn QuorumContext, now: u64) {
        self.register_paxos_id(msg.paxos_id(), msg.node_id(), ctx, now);
        if ctx.is_paxos_blocked() {
            return;
        }
        match msg {
            PaxosMessage::PrepareRequest {
                paxos_id,
                node_id,
                proposal_id,
            } => {
                if *paxos_id == self.paxos_id {
                    let reply = self.acceptor.on_prepare_request(*proposal_id, ctx.database());
                    self.send(*node_id, reply, ctx);
                }
                self.help_lagging_sender(*paxos_id, *node_id, ctx);
            }
            PaxosMessage::ProposeRequest {
                paxos_id,
                node_id,
                proposal_id,
                run_id,
                value,
            } => {
                if *paxos_id == self.paxos_id {
                    let reply = self.acceptor.on_propose_request(
                        *proposal_id,
                        *run_id,
                        value.clone(),
                        ctx.database(),
                    );
                    self.send(*node_id, reply, ctx);
                }
                self.help_lagging_sender(*paxos_id, *node_id, ctx);
            }
            msg if msg.is_prepare_response() => {
                if msg.paxos_id() == self.paxos_id {
                    let quorum = ctx.quorum().clone();
                    self.proposer
                        .on_prepare_response(msg, &quorum, ctx.transport(), now);
                }
            }
            msg if msg.is_propose_response() => {
                if msg.paxos_id() == self.paxos_id {
                    let quorum = ctx.quorum().clone();
                    self.proposer
                        .on_propose_response(msg, &quorum, ctx.transport(), now);
                }
            }
            msg if msg.is_learn() => self.on_learn_chosen(msg, ctx, now),
            PaxosMessage::RequestChosen { paxos_id, node_id } => {
                self.on_request_chosen(*paxos_id, *node_id, ctx);
            }
            PaxosMessage::StartCatchup { node_id, .. } => {
                // only the lease owner may push us into catchup
                if Some(*node_id) == ctx.lease_owner() {
                    self.catchup_requested = true;
                }
            }
            _ => {}
        }
    }

    fn on_learn_chosen(&mut self, msg: &PaxosMessage, ctx: &mut dyn QuorumContext, now: u64) {
        if self.waiting_on_append {
            // mid-apply; the sender will answer our RequestChosen later
            return;
        }
        if msg.paxos_id() != self.paxos_id {
            return;
        }
        let (run_id, value) = match msg {
            PaxosMessage::LearnValue { value, .. } => {
                self.acceptor.install_chosen(value.clone(), ctx.database());
                (RunId(0), value.clone())
            }
            PaxosMessage::LearnProposal { proposal_id, .. } => {
                match self.acceptor.accepted() {
                    Some(accepted) if accepted.proposal_id == *proposal_id => {
                        (accepted.run_id, accepted.value.clone())
                    }
                    // we did not accept what was chosen; fetch the value
                    _ => {
                        self.request_chosen(msg.node_id(), ctx, now);
                        return;
                    }
                }
            }
            _ => return,
        };
        self.process_learn_chosen(msg.node_id(), run_id, value, ctx, now);
    }

    fn process_learn_chosen(
        &mut self,
        from: NodeId,
        run_id: RunId,
        value: Bytes,
        ctx: &mut dyn QuorumContext,
        now: u64,
    ) {
        debug!(paxos_id = self.paxos_id, "round complete");
        ctx.database().save_round(self.paxos_id, value.clone());

        self.waiting_on_append = true;
        let own_append = self.proposer.is_multi();
        if from == self.replication.node_id
            && run_id == self.replication.run_id
            && ctx.is_lease_owner()
        {
            self.proposer.set_multi(true);
            if !own_append {
                info!("multi paxos enabled, this node leads the quorum");
                ctx.on_is_leader();
            }
        } else {
            self.proposer.set_multi(false);
        }
        let own_append = own_append && self.proposer.is_multi();

        if value == DUMMY_VALUE {
            self.on_append_complete(ctx, now);
        } else {
            match ctx.on_append(self.paxos_id, value, own_append) {
                AppendOutcome::Complete => self.on_append_complete(ctx, now),
                AppendOutcome::Pending => {}
            }
        }
    }

    /// Close the round just applied and move on. Called internally for
    /// synchronous appends, and by the embedder once a
    /// [`AppendOutcome::Pending`] apply finishes.
    pub fn on_append_complete(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        self.waiting_on_append = false;
        self.new_paxos_round(ctx);
        if ctx.is_lease_known() && self.paxos_id <= self.highest_seen_paxos_id {
            if let Some(owner) = ctx.lease_owner() {
                self.request_chosen(owner, ctx, now);
            }
        }
        self.try_append_next_value(ctx, now);
    }

    fn new_paxos_round(&mut self, ctx: &mut dyn QuorumContext) {
        self.paxos_id += 1;
        self.proposer.move_to_round(self.paxos_id);
        self.acceptor.move_to_round(self.paxos_id, ctx.database());
        self.last_request_chosen_time = None;
        ctx.set_paxos_id(self.paxos_id);
    }

    /// Propose the next pending value if this node may and nothing is in
    /// flight. The multi-paxos fast path only.
    pub fn try_append_next_value(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        if self.waiting_on_append {
            return;
        }
        if ctx.quorum().is_single_member() && ctx.is_lease_owner() {
            self.append_single_member(ctx, now);
            return;
        }
        if !ctx.is_lease_owner()
            || self.proposer.is_active()
            || self.proposer.learn_sent()
            || !self.proposer.is_multi()
        {
            return;
        }
        if self.append_dummy_next {
            self.append_dummy_next = false;
            self.try_append_dummy(ctx, now);
            return;
        }
        if let Some(value) = ctx.next_value() {
            self.append(value, ctx, now);
        }
    }

    /// Append a canary value: replication liveness proof and the vehicle
    /// for enabling multi-paxos after winning the lease.
    pub fn try_append_dummy(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        if self.proposer.is_active() || self.proposer.learn_sent() || self.waiting_on_append {
            self.append_dummy_next = true;
            return;
        }
        self.append(Bytes::from_static(DUMMY_VALUE), ctx, now);
    }

    fn append(&mut self, value: Bytes, ctx: &mut dyn QuorumContext, now: u64) {
        if self.proposer.is_active() || self.proposer.learn_sent() {
            return;
        }
        if ctx.quorum().is_single_member() {
            self.choose_single_member(value, ctx, now);
            return;
        }
        let quorum = ctx.quorum().clone();
        self.proposer.propose(value, &quorum, ctx.transport(), now);
    }

    /// With one member there is nothing to agree with; every append is
    /// chosen the moment it is made.
    fn append_single_member(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        if self.append_dummy_next {
            self.append_dummy_next = false;
            self.choose_single_member(Bytes::from_static(DUMMY_VALUE), ctx, now);
            return;
        }
        if let Some(value) = ctx.next_value() {
            self.choose_single_member(value, ctx, now);
        }
    }

    fn choose_single_member(&mut self, value: Bytes, ctx: &mut dyn QuorumContext, now: u64) {
        self.process_learn_chosen(self.replication.node_id, self.replication.run_id, value, ctx, now);
    }

    /// The context learned a lease. A fresh owner appends a canary round
    /// to flush any values chosen under the previous leader and switch
    /// the proposer into multi-paxos.
    pub fn on_learn_lease(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        if ctx.is_lease_owner() && !self.proposer.is_active() && !self.proposer.is_multi() {
            debug!("lease won, appending canary to enable multi paxos");
            self.try_append_dummy(ctx, now);
        }
    }

    pub fn on_lease_timeout(&mut self) {
        self.proposer.stop();
    }

    /// Replication pauses while shards are rewritten underneath it.
    pub fn on_catchup_started(&mut self) {
        self.stop();
    }

    /// The snapshot reflects all rounds through `paxos_id`; resume at the
    /// following one.
    pub fn on_catchup_complete(&mut self, paxos_id: PaxosId, ctx: &mut dyn QuorumContext) {
        info!(paxos_id, "catchup complete");
        // the durable position was already persisted by the catchup commit;
        // only the round machinery moves here
        self.paxos_id = paxos_id + 1;
        self.proposer.move_to_round(self.paxos_id);
        self.acceptor.move_to_round(self.paxos_id, ctx.database());
        self.last_request_chosen_time = None;
        self.waiting_on_append = false;
    }

    pub fn on_timer(&mut self, ctx: &mut dyn QuorumContext, now: u64) {
        if self.canary_deadline.is_some_and(|deadline| now >= deadline) {
            self.canary_deadline = Some(now + self.config.canary_timeout);
            if ctx.is_lease_owner() && !ctx.is_paxos_blocked() && !self.is_appending(ctx) {
                debug!("idle leader, appending canary");
                self.try_append_dummy(ctx, now);
            }
        }
        if ctx.is_paxos_blocked() {
            // shards are being rewritten underneath the round; park it
            self.proposer.extend_timeout(now);
            return;
        }
        let quorum = ctx.quorum().clone();
        self.proposer.on_timeout(&quorum, ctx.transport(), now);
    }

    fn on_request_chosen(&mut self, paxos_id: PaxosId, from: NodeId, ctx: &mut dyn QuorumContext) {
        if paxos_id >= self.paxos_id {
            return;
        }
        match ctx.database().round(paxos_id) {
            Some(value) => {
                let msg = PaxosMessage::LearnValue {
                    paxos_id,
                    node_id: self.replication.node_id,
                    run_id: RunId(0),
                    value,
                };
                self.send(from, msg, ctx);
            }
            None => {
                // the round fell out of the cache; only a snapshot helps
                debug!(paxos_id, peer = %from, "requested round no longer stored");
                let msg = PaxosMessage::StartCatchup {
                    paxos_id: self.paxos_id,
                    node_id: self.replication.node_id,
                };
                self.send(from, msg, ctx);
            }
        }
    }

    /// Answer a request from an earlier round with the chosen value, if
    /// still stored.
    fn help_lagging_sender(&mut self, paxos_id: PaxosId, from: NodeId, ctx: &mut dyn QuorumContext) {
        if paxos_id >= self.paxos_id {
            return;
        }
        if let Some(value) = ctx.database().round(paxos_id) {
            let msg = PaxosMessage::LearnValue {
                paxos_id,
                node_id: self.replication.node_id,
                run_id: RunId(0),
                value,
            };
            self.send(from, msg, ctx);
        }
    }

    fn request_chosen(&mut self, to: NodeId, ctx: &mut dyn QuorumContext, now: u64) {
        if ctx.is_lease_owner() || self.waiting_on_append {
            return;
        }
        if self
            .last_request_chosen_time
            .is_some_and(|last| now.saturating_sub(last) < self.config.request_chosen_timeout)
        {
            return;
        }
        self.last_request_chosen_time = Some(now);
        let msg = PaxosMessage::RequestChosen {
            paxos_id: self.paxos_id,
            node_id: self.replication.node_id,
        };
        self.send(to, msg, ctx);
    }

    fn send(&self, to: NodeId, msg: PaxosMessage, ctx: &mut dyn QuorumContext) {
        ctx.transport().send(
            to,
            Envelope {
                quorum_id: self.quorum_id,
                message: msg.into(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ChannelTransport, MemoryStore, ProposalId, Quorum, QuorumMessage, QuorumStore,
        QuorumTransport,
    };
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct TestCtx {
        quorum: Quorum,
        store: MemoryStore,
        transport: ChannelTransport,
        durable_paxos_id: PaxosId,
        lease_owner: Option<NodeId>,
        me: NodeId,
        pending: VecDeque<Bytes>,
        applied: Vec<(PaxosId, Bytes, bool)>,
        leader_events: usize,
        append_is_async: bool,
        blocked: bool,
    }

    impl TestCtx {
        fn new(me: u64, n: u64) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
            let mut transport = ChannelTransport::new();
            // every route lands in the one observer inbox, so peer-directed
            // replies are visible to assertions too
            let (tx, inbox) = mpsc::unbounded_channel();
            for node in 0..n {
                transport.connect(NodeId(node), tx.clone());
            }
            let ctx = Self {
                quorum: Quorum::new((0..n).map(NodeId)),
                store: MemoryStore::new(),
                transport,
                durable_paxos_id: 0,
                lease_owner: None,
                me: NodeId(me),
                pending: VecDeque::new(),
                applied: Vec::new(),
                leader_events: 0,
                append_is_async: false,
                blocked: false,
            };
            (ctx, inbox)
        }
    }

    impl QuorumContext for TestCtx {
        fn quorum(&self) -> &Quorum {
            &self.quorum
        }
        fn quorum_id(&self) -> QuorumId {
            QuorumId(1)
        }
        fn database(&mut self) -> &mut dyn QuorumStore {
            &mut self.store
        }
        fn transport(&mut self) -> &mut dyn QuorumTransport {
            &mut self.transport
        }
        fn is_leader(&self) -> bool {
            self.is_lease_owner()
        }
        fn is_lease_owner(&self) -> bool {
            self.lease_owner == Some(self.me)
        }
        fn is_lease_known(&self) -> bool {
            self.lease_owner.is_some()
        }
        fn lease_owner(&self) -> Option<NodeId> {
            self.lease_owner
        }
        fn paxos_id(&self) -> PaxosId {
            self.durable_paxos_id
        }
        fn set_paxos_id(&mut self, paxos_id: PaxosId) {
            self.durable_paxos_id = paxos_id;
        }
        fn next_value(&mut self) -> Option<Bytes> {
            self.pending.pop_front()
        }
        fn on_append(&mut self, paxos_id: PaxosId, value: Bytes, own_append: bool) -> AppendOutcome {
            self.applied.push((paxos_id, value, own_append));
            if self.append_is_async {
                AppendOutcome::Pending
            } else {
                AppendOutcome::Complete
            }
        }
        fn on_learn_lease(&mut self, owner: NodeId) {
            self.lease_owner = Some(owner);
        }
        fn on_lease_timeout(&mut self) {
            self.lease_owner = None;
        }
        fn on_is_leader(&mut self) {
            self.leader_events += 1;
        }
        fn on_start_catchup(&mut self) {}
        fn on_catchup_complete(&mut self, _: PaxosId) {}
        fn stop_replication(&mut self) {
            self.blocked = true;
        }
        fn continue_replication(&mut self) {
            self.blocked = false;
        }
        fn is_paxos_blocked(&self) -> bool {
            self.blocked
        }
    }

    fn log(ctx: &mut TestCtx) -> ReplicatedLog {
        let replication = ReplicationConfig::new(ctx.me, crate::RunId(7));
        ReplicatedLog::new(replication, QuorumId(1), QuorumConfig::default(), ctx, 0)
    }

    fn drain(inbox: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<PaxosMessage> {
        let mut out = Vec::new();
        while let Ok(env) = inbox.try_recv() {
            if let QuorumMessage::Paxos(msg) = env.message {
                out.push(msg);
            }
        }
        out
    }

    /// Run a round to completion: loop the node's own broadcasts back into
    /// it and synthesize the two remote acceptors' responses.
    fn run_round_to_learn(
        log: &mut ReplicatedLog,
        ctx: &mut TestCtx,
        inbox: &mut mpsc::UnboundedReceiver<Envelope>,
        now: u64,
    ) {
        for _ in 0..6 {
            for msg in drain(inbox) {
                log.on_message(&msg, ctx, now);
                match msg {
                    PaxosMessage::PrepareRequest {
                        paxos_id,
                        proposal_id,
                        ..
                    } => {
                        for node in [1, 2] {
                            log.on_message(
                                &PaxosMessage::PrepareCurrentlyOpen {
                                    paxos_id,
                                    node_id: NodeId(node),
                                    proposal_id,
                                },
                                ctx,
                                now,
                            );
                        }
                    }
                    PaxosMessage::ProposeRequest {
                        paxos_id,
                        proposal_id,
                        ..
                    } => {
                        for node in [1, 2] {
                            log.on_message(
                                &PaxosMessage::ProposeAccepted {
                                    paxos_id,
                                    node_id: NodeId(node),
                                    proposal_id,
                                },
                                ctx,
                                now,
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn learn_value_applies_and_advances() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(b"v0"),
            },
            &mut ctx,
            10,
        );
        assert_eq!(ctx.applied, vec![(0, Bytes::from_static(b"v0"), false)]);
        assert_eq!(log.paxos_id(), 1);
        assert_eq!(ctx.durable_paxos_id, 1);
        assert_eq!(ctx.store.round(0), Some(Bytes::from_static(b"v0")));
        assert!(!log.is_multi_paxos_enabled());
    }

    #[test]
    fn dummy_round_advances_without_applying() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(DUMMY_VALUE),
            },
            &mut ctx,
            10,
        );
        assert!(ctx.applied.is_empty());
        assert_eq!(log.paxos_id(), 1);
    }

    #[test]
    fn ahead_peer_triggers_throttled_request_chosen() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        let probe = |paxos_id| PaxosMessage::RequestChosen {
            paxos_id,
            node_id: NodeId(1),
        };
        log.on_message(&probe(5), &mut ctx, 10);
        assert_eq!(
            drain(&mut inbox),
            vec![PaxosMessage::RequestChosen {
                paxos_id: 0,
                node_id: NodeId(0),
            }]
        );
        // within the throttle window nothing is sent
        log.on_message(&probe(6), &mut ctx, 500);
        assert!(drain(&mut inbox).is_empty());
        log.on_message(&probe(6), &mut ctx, 1010);
        assert_eq!(drain(&mut inbox).len(), 1);
        assert_eq!(log.highest_seen_paxos_id(), 6);
    }

    #[test]
    fn deep_lag_requests_bulk_catchup() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        assert!(!log.take_catchup_request());
        log.register_paxos_id(1000, NodeId(1), &mut ctx, 10);
        assert!(!log.take_catchup_request());
        log.register_paxos_id(1001, NodeId(1), &mut ctx, 10);
        assert!(log.take_catchup_request());
        assert!(!log.take_catchup_request());
    }

    #[test]
    fn start_catchup_only_honored_from_lease_owner() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        let msg = PaxosMessage::StartCatchup {
            paxos_id: 3,
            node_id: NodeId(2),
        };
        log.on_message(&msg, &mut ctx, 10);
        assert!(!log.take_catchup_request());
        ctx.lease_owner = Some(NodeId(2));
        log.on_message(&msg, &mut ctx, 10);
        assert!(log.take_catchup_request());
    }

    #[test]
    fn request_chosen_is_answered_from_the_round_cache() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(b"v0"),
            },
            &mut ctx,
            10,
        );
        drain(&mut inbox);
        log.on_message(
            &PaxosMessage::RequestChosen {
                paxos_id: 0,
                node_id: NodeId(2),
            },
            &mut ctx,
            20,
        );
        assert_eq!(
            drain(&mut inbox),
            vec![PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(0),
                run_id: RunId(0),
                value: Bytes::from_static(b"v0"),
            }]
        );
    }

    #[test]
    fn evicted_round_redirects_to_bulk_catchup() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        for i in 0..3u64 {
            log.on_message(
                &PaxosMessage::LearnValue {
                    paxos_id: i,
                    node_id: NodeId(1),
                    run_id: RunId(0),
                    value: Bytes::from_static(b"v"),
                },
                &mut ctx,
                10,
            );
        }
        // simulate cache eviction of round 0
        ctx.store = MemoryStore::new();
        drain(&mut inbox);
        log.on_message(
            &PaxosMessage::RequestChosen {
                paxos_id: 0,
                node_id: NodeId(2),
            },
            &mut ctx,
            20,
        );
        assert_eq!(
            drain(&mut inbox),
            vec![PaxosMessage::StartCatchup {
                paxos_id: 3,
                node_id: NodeId(0),
            }]
        );
    }

    #[test]
    fn mismatched_learn_proposal_falls_back_to_request_chosen() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        log.on_message(
            &PaxosMessage::LearnProposal {
                paxos_id: 0,
                node_id: NodeId(1),
                proposal_id: ProposalId(42),
            },
            &mut ctx,
            10,
        );
        assert!(ctx.applied.is_empty());
        assert_eq!(log.paxos_id(), 0);
        assert_eq!(
            drain(&mut inbox),
            vec![PaxosMessage::RequestChosen {
                paxos_id: 0,
                node_id: NodeId(0),
            }]
        );
    }

    #[test]
    fn pending_append_defers_round_close_and_drops_learns() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        ctx.append_is_async = true;
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(b"v0"),
            },
            &mut ctx,
            10,
        );
        assert!(log.is_waiting_on_append());
        assert_eq!(log.paxos_id(), 0);

        // learns during the apply are dropped, not queued
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(b"other"),
            },
            &mut ctx,
            11,
        );
        assert_eq!(ctx.applied.len(), 1);

        log.on_append_complete(&mut ctx, 12);
        assert!(!log.is_waiting_on_append());
        assert_eq!(log.paxos_id(), 1);
    }

    #[test]
    fn lease_win_runs_canary_round_and_enables_multi() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        ctx.lease_owner = Some(NodeId(0));
        log.on_learn_lease(&mut ctx, 10);
        run_round_to_learn(&mut log, &mut ctx, &mut inbox, 10);

        assert!(log.is_multi_paxos_enabled());
        assert_eq!(ctx.leader_events, 1);
        assert_eq!(log.paxos_id(), 1);
        assert!(ctx.applied.is_empty(), "canary must not reach on_append");
    }

    #[test]
    fn own_append_flag_set_on_uninterrupted_leader_append() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        ctx.lease_owner = Some(NodeId(0));
        log.on_learn_lease(&mut ctx, 10);
        run_round_to_learn(&mut log, &mut ctx, &mut inbox, 10);
        assert!(log.is_multi_paxos_enabled());

        // an uninterrupted append by the standing leader is flagged so the
        // embedder can complete client requests instead of replaying
        ctx.pending.push_back(Bytes::from_static(b"w1"));
        log.try_append_next_value(&mut ctx, 20);
        run_round_to_learn(&mut log, &mut ctx, &mut inbox, 20);
        assert_eq!(ctx.applied.len(), 1);
        let (paxos_id, value, own_append) = &ctx.applied[0];
        assert_eq!((*paxos_id, value.clone()), (1, Bytes::from_static(b"w1")));
        assert!(own_append, "standing leader append keeps the fast path");
        assert!(log.is_multi_paxos_enabled());
        assert_eq!(ctx.leader_events, 1, "leadership is announced only once");
    }

    #[test]
    fn single_member_appends_synchronously() {
        let (mut ctx, _inbox) = TestCtx::new(0, 1);
        let mut log = log(&mut ctx);
        ctx.lease_owner = Some(NodeId(0));
        log.on_learn_lease(&mut ctx, 10);
        assert!(log.is_multi_paxos_enabled());
        assert_eq!(ctx.leader_events, 1);

        ctx.pending.push_back(Bytes::from_static(b"a"));
        ctx.pending.push_back(Bytes::from_static(b"b"));
        log.try_append_next_value(&mut ctx, 20);
        assert_eq!(
            ctx.applied,
            vec![
                (1, Bytes::from_static(b"a"), true),
                (2, Bytes::from_static(b"b"), true),
            ]
        );
        assert_eq!(log.paxos_id(), 3);
        assert_eq!(ctx.durable_paxos_id, 3);
    }

    #[test]
    fn catchup_complete_resumes_after_the_snapshot() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        log.on_catchup_started();
        ctx.set_paxos_id(12345);
        log.on_catchup_complete(12345, &mut ctx);
        assert_eq!(log.paxos_id(), 12346);
        assert_eq!(ctx.durable_paxos_id, 12345);
        // the next learned round applies normally
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 12346,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(b"v"),
            },
            &mut ctx,
            10,
        );
        assert_eq!(ctx.applied, vec![(12346, Bytes::from_static(b"v"), false)]);
        assert_eq!(ctx.durable_paxos_id, 12347);
    }

    #[test]
    fn blocked_log_ignores_paxos_traffic() {
        let (mut ctx, _inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        ctx.blocked = true;
        log.on_message(
            &PaxosMessage::LearnValue {
                paxos_id: 0,
                node_id: NodeId(1),
                run_id: RunId(0),
                value: Bytes::from_static(b"v0"),
            },
            &mut ctx,
            10,
        );
        assert!(ctx.applied.is_empty());
        assert_eq!(log.paxos_id(), 0);
    }

    #[test]
    fn blocked_round_timeout_rearms_without_restarting() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        ctx.lease_owner = Some(NodeId(0));
        // canary prepare now in flight, deadline at 1000
        log.on_learn_lease(&mut ctx, 0);
        drain(&mut inbox);

        ctx.stop_replication();
        log.on_timer(&mut ctx, 1000);
        assert!(drain(&mut inbox).is_empty(), "no new round while paused");
        assert_eq!(log.next_deadline(), Some(2000), "deadline pushed back");

        ctx.continue_replication();
        log.on_timer(&mut ctx, 2000);
        assert!(matches!(
            drain(&mut inbox).first(),
            Some(PaxosMessage::PrepareRequest { .. })
        ));
    }

    #[test]
    fn idle_leader_appends_canary_on_timer() {
        let (mut ctx, mut inbox) = TestCtx::new(0, 3);
        let mut log = log(&mut ctx);
        ctx.lease_owner = Some(NodeId(0));
        log.on_learn_lease(&mut ctx, 10);
        run_round_to_learn(&mut log, &mut ctx, &mut inbox, 10);
        drain(&mut inbox);

        log.on_timer(&mut ctx, 59_999);
        assert!(drain(&mut inbox).is_empty());
        log.on_timer(&mut ctx, 60_000);
        // multi paxos is on, so the canary goes straight to propose
        assert!(matches!(
            drain(&mut inbox).first(),
            Some(PaxosMessage::ProposeRequest { .. })
        ));
    }
}
