//! Asynchronous driver for one quorum.
//!
//! [`QuorumRuntime`] owns the replicated log, the lease machinery and the
//! catchup endpoints, and multiplexes them over a single tokio task: one
//! inbox of decoded [`Envelope`]s, one command channel from the embedding
//! application, and a timer armed at the earliest pending deadline.
//!
//! The embedder talks to the task through a [`QuorumHandle`]. Values are
//! not sent through the handle; the context's `next_value` supplies them,
//! and [`QuorumHandle::notify_value_available`] merely wakes the loop.

use std::time::Duration;

use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    CatchupEvent, CatchupMessage, CatchupReader, CatchupWriter, Envelope, LeaseMessage,
    NodeContextInfo, NodeId, OperationContext, PaxosLease, QuorumConfig, QuorumContext,
    QuorumContextInfo, QuorumId, QuorumMessage, ReplicatedLog, ReplicationConfig, RuntimeError,
};

#[derive(Debug)]
enum RuntimeCommand {
    /// The context has new pending values; try the fast path now.
    ValueAvailable,
    AcquireLease,
    StopAcquiringLease,
    /// A [`AppendOutcome::Pending`](crate::AppendOutcome::Pending) apply
    /// finished; the round may close.
    AppendComplete,
}

/// Cheap cloneable handle to a running [`QuorumRuntime`].
#[derive(Clone, Debug)]
pub struct QuorumHandle {
    commands: mpsc::UnboundedSender<RuntimeCommand>,
    cancel: CancellationToken,
}

impl QuorumHandle {
    /// Wake the proposer: the context can supply at least one new value.
    pub fn notify_value_available(&self) -> Result<(), Report<RuntimeError>> {
        self.send(RuntimeCommand::ValueAvailable)
            .attach_printable(OperationContext::PROPOSING)
    }

    /// Start competing for the leadership lease, and keep competing until
    /// [`stop_acquiring_lease`](Self::stop_acquiring_lease).
    pub fn acquire_lease(&self) -> Result<(), Report<RuntimeError>> {
        self.send(RuntimeCommand::AcquireLease)
            .attach_printable(OperationContext::ACQUIRING_LEASE)
    }

    pub fn stop_acquiring_lease(&self) -> Result<(), Report<RuntimeError>> {
        self.send(RuntimeCommand::StopAcquiringLease)
            .attach_printable(OperationContext::ACQUIRING_LEASE)
    }

    /// Signal that an asynchronous apply finished.
    pub fn append_complete(&self) -> Result<(), Report<RuntimeError>> {
        self.send(RuntimeCommand::AppendComplete)
            .attach_printable(OperationContext::PROPOSING)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: RuntimeCommand) -> Result<(), Report<RuntimeError>> {
        self.commands
            .send(command)
            .map_err(|_| Report::new(RuntimeError::CommandChannelClosed))
    }
}

pub struct QuorumRuntime<C> {
    ctx: C,
    log: ReplicatedLog,
    lease: PaxosLease,
    reader: CatchupReader,
    writer: Option<CatchupWriter>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::UnboundedReceiver<RuntimeCommand>,
    cancel: CancellationToken,
    node_id: NodeId,
    quorum_id: QuorumId,
    config: QuorumConfig,
    /// Deferred lease acquisition, staggered so rebooting nodes do not
    /// start synchronized duels.
    acquire_at: Option<u64>,
    last_lease_owner: Option<NodeId>,
    start: Instant,
}

impl<C: QuorumContext> QuorumRuntime<C> {
    pub fn new(
        replication: ReplicationConfig,
        quorum_id: QuorumId,
        config: QuorumConfig,
        mut ctx: C,
        inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> (Self, QuorumHandle) {
        let start = Instant::now();
        let log = ReplicatedLog::new(replication, quorum_id, config, &mut ctx, 0);
        let lease = PaxosLease::new(replication, quorum_id, &config);
        let reader = CatchupReader::new(config.catchup_commit_granularity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = QuorumHandle {
            commands: command_tx,
            cancel: cancel.clone(),
        };
        let runtime = Self {
            ctx,
            log,
            lease,
            reader,
            writer: None,
            inbox,
            commands: command_rx,
            cancel,
            node_id: replication.node_id,
            quorum_id,
            config,
            acquire_at: None,
            last_lease_owner: None,
            start,
        };
        (runtime, handle)
    }

    pub async fn run(mut self) -> Result<(), Report<RuntimeError>> {
        info!(node = %self.node_id, quorum = %self.quorum_id, "quorum runtime started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(node = %self.node_id, "quorum runtime cancelled");
                    self.log.stop();
                    return Ok(());
                }

                command = self.commands.recv() => {
                    let command = command
                        .ok_or_else(|| Report::new(RuntimeError::CommandChannelClosed))
                        .attach_printable(OperationContext::RUNNING_QUORUM)
                        .attach_printable(QuorumContextInfo::new(self.quorum_id))
                        .attach_printable(NodeContextInfo::new(self.node_id))?;
                    self.handle_command(command);
                }

                envelope = self.inbox.recv() => {
                    let envelope = envelope
                        .ok_or_else(|| Report::new(RuntimeError::TransportClosed))
                        .attach_printable(OperationContext::RUNNING_QUORUM)
                        .attach_printable(QuorumContextInfo::new(self.quorum_id))
                        .attach_printable(NodeContextInfo::new(self.node_id))?;
                    self.handle_envelope(envelope);
                }

                () = sleep_until(self.start, deadline) => {
                    self.handle_timer();
                }
            }
            self.drive_catchup();
            self.drive_writer();
        }
    }

    /// Milliseconds since the runtime was created; the time base every
    /// deadline in the consensus state machines is expressed in.
    fn now(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn next_deadline(&self) -> Option<u64> {
        [
            self.log.next_deadline(),
            self.lease.next_deadline(),
            self.acquire_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn handle_command(&mut self, command: RuntimeCommand) {
        let now = self.now();
        match command {
            RuntimeCommand::ValueAvailable => {
                self.log.try_append_next_value(&mut self.ctx, now);
            }
            RuntimeCommand::AcquireLease => {
                let stagger = self.config.acquire_lease_timeout / 4;
                self.acquire_at = Some(now + rand::random_range(0..=stagger));
            }
            RuntimeCommand::StopAcquiringLease => {
                self.acquire_at = None;
                self.lease.stop_acquiring();
            }
            RuntimeCommand::AppendComplete => {
                self.log.on_append_complete(&mut self.ctx, now);
            }
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        if envelope.quorum_id != self.quorum_id {
            debug!(quorum = %envelope.quorum_id, "message for another quorum, dropping");
            return;
        }
        let now = self.now();
        match envelope.message {
            QuorumMessage::Paxos(msg) => {
                self.log.on_message(&msg, &mut self.ctx, now);
            }
            QuorumMessage::Lease(msg) => {
                // lease prepares carry the sender's log position; feed it to
                // lag detection like any replication message
                if let LeaseMessage::PrepareRequest {
                    node_id, paxos_id, ..
                } = &msg
                {
                    self.log
                        .register_paxos_id(*paxos_id, *node_id, &mut self.ctx, now);
                }
                self.lease.on_message(&msg, &mut self.ctx, now);
                self.sync_lease(now);
            }
            QuorumMessage::Catchup(msg) => {
                self.on_catchup_message(msg, now);
            }
        }
    }

    fn handle_timer(&mut self) {
        let now = self.now();
        if self.acquire_at.is_some_and(|at| now >= at) {
            self.acquire_at = None;
            self.lease.acquire_lease(&mut self.ctx, now);
            self.sync_lease(now);
        }
        self.lease.on_timer(&mut self.ctx, now);
        self.sync_lease(now);
        self.log.on_timer(&mut self.ctx, now);
    }

    /// Mirror lease ownership changes into the log. The context is the
    /// authority: it hears about every grant and expiry, including the
    /// single-member shortcut that bypasses the learner.
    fn sync_lease(&mut self, now: u64) {
        let owner = self.ctx.lease_owner();
        if owner == self.last_lease_owner {
            return;
        }
        self.last_lease_owner = owner;
        match owner {
            Some(owner) => {
                debug!(%owner, "lease owner changed");
                self.log.on_learn_lease(&mut self.ctx, now);
            }
            None => self.log.on_lease_timeout(),
        }
    }

    fn on_catchup_message(&mut self, msg: CatchupMessage, now: u64) {
        match msg {
            CatchupMessage::Request { node_id, .. } => {
                if !self.ctx.is_lease_owner() {
                    debug!(peer = %node_id, "ignoring catchup request, not lease owner");
                    return;
                }
                if self.writer.as_ref().is_some_and(|w| !w.is_complete()) {
                    debug!(peer = %node_id, "catchup transfer already in progress");
                    return;
                }
                // the round in progress has no durable effects yet
                let snapshot_id = self.ctx.paxos_id().saturating_sub(1);
                self.writer = Some(CatchupWriter::new(node_id, snapshot_id, self.ctx.database()));
            }
            msg => match self.reader.on_message(&msg, self.ctx.database()) {
                CatchupEvent::Complete(paxos_id) => {
                    self.ctx.set_paxos_id(paxos_id);
                    self.log.on_catchup_complete(paxos_id, &mut self.ctx);
                    self.ctx.on_catchup_complete(paxos_id);
                    self.ctx.continue_replication();
                    // rounds chosen during the transfer still need replaying
                    self.log.try_catchup(&mut self.ctx, now);
                }
                CatchupEvent::Aborted => {
                    self.ctx.continue_replication();
                }
                CatchupEvent::Progress => {}
            },
        }
    }

    /// Turn a lag detection verdict into an actual snapshot request.
    fn drive_catchup(&mut self) {
        if !self.log.take_catchup_request() || self.reader.is_active() {
            return;
        }
        let Some(owner) = self.ctx.lease_owner() else {
            debug!("bulk catchup needed but lease owner unknown");
            return;
        };
        if owner == self.node_id {
            return;
        }
        info!(%owner, "falling back to bulk catchup");
        self.ctx.on_start_catchup();
        self.ctx.stop_replication();
        self.log.on_catchup_started();
        self.reader.begin();
        let envelope = Envelope {
            quorum_id: self.quorum_id,
            message: CatchupMessage::Request {
                node_id: self.node_id,
                quorum_id: self.quorum_id,
            }
            .into(),
        };
        self.ctx.transport().send(owner, envelope);
    }

    fn drive_writer(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let to = writer.to();
        while let Some(msg) = writer.next_message(self.ctx.database()) {
            let envelope = Envelope {
                quorum_id: self.quorum_id,
                message: msg.into(),
            };
            self.ctx.transport().send(to, envelope);
        }
        if self.writer.as_ref().is_some_and(CatchupWriter::is_complete) {
            self.writer = None;
        }
    }
}

async fn sleep_until(start: Instant, deadline: Option<u64>) {
    match deadline {
        Some(ms) => tokio::time::sleep_until(start + Duration::from_millis(ms)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AppendOutcome, ChannelTransport, MemoryStore, PaxosId, Quorum, QuorumStore,
        QuorumTransport, RunId,
    };
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Shared {
        paxos_id: PaxosId,
        lease_owner: Option<NodeId>,
        pending: VecDeque<Bytes>,
        applied: Vec<(PaxosId, Bytes)>,
    }

    struct TestCtx {
        node_id: NodeId,
        quorum: Quorum,
        store: MemoryStore,
        transport: ChannelTransport,
        shared: Arc<Mutex<Shared>>,
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
            self.shared.lock().unwrap().lease_owner == Some(self.node_id)
        }
        fn is_lease_known(&self) -> bool {
            self.shared.lock().unwrap().lease_owner.is_some()
        }
        fn lease_owner(&self) -> Option<NodeId> {
            self.shared.lock().unwrap().lease_owner
        }
        fn paxos_id(&self) -> PaxosId {
            self.shared.lock().unwrap().paxos_id
        }
        fn set_paxos_id(&mut self, paxos_id: PaxosId) {
            self.shared.lock().unwrap().paxos_id = paxos_id;
        }
        fn next_value(&mut self) -> Option<Bytes> {
            self.shared.lock().unwrap().pending.pop_front()
        }
        fn on_append(&mut self, paxos_id: PaxosId, value: Bytes, _own: bool) -> AppendOutcome {
            self.shared.lock().unwrap().applied.push((paxos_id, value));
            AppendOutcome::Complete
        }
        fn on_learn_lease(&mut self, owner: NodeId) {
            self.shared.lock().unwrap().lease_owner = Some(owner);
        }
        fn on_lease_timeout(&mut self) {
            self.shared.lock().unwrap().lease_owner = None;
        }
        fn on_is_leader(&mut self) {}
        fn on_start_catchup(&mut self) {}
        fn on_catchup_complete(&mut self, _: PaxosId) {}
        fn stop_replication(&mut self) {}
        fn continue_replication(&mut self) {}
        fn is_paxos_blocked(&self) -> bool {
            false
        }
    }

    struct Node {
        handle: QuorumHandle,
        shared: Arc<Mutex<Shared>>,
        task: tokio::task::JoinHandle<Result<(), Report<RuntimeError>>>,
    }

    fn spawn_cluster(n: u64) -> Vec<Node> {
        let quorum = Quorum::new((0..n).map(NodeId));
        let mut senders = Vec::new();
        let mut inboxes = Vec::new();
        for _ in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            inboxes.push(rx);
        }
        inboxes
            .into_iter()
            .enumerate()
            .map(|(i, inbox)| {
                let mut transport = ChannelTransport::new();
                for (j, tx) in senders.iter().enumerate() {
                    transport.connect(NodeId(j as u64), tx.clone());
                }
                let shared = Arc::new(Mutex::new(Shared::default()));
                let ctx = TestCtx {
                    node_id: NodeId(i as u64),
                    quorum: quorum.clone(),
                    store: MemoryStore::new(),
                    transport,
                    shared: Arc::clone(&shared),
                };
                let replication = ReplicationConfig::new(NodeId(i as u64), RunId(i as u64 + 1));
                let (runtime, handle) =
                    QuorumRuntime::new(replication, QuorumId(1), QuorumConfig::default(), ctx, inbox);
                let task = tokio::spawn(runtime.run());
                Node {
                    handle,
                    shared,
                    task,
                }
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn leader_appends_replicate_to_every_node() {
        let nodes = spawn_cluster(3);
        nodes[0].handle.acquire_lease().unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(
                node.shared.lock().unwrap().lease_owner,
                Some(NodeId(0)),
                "node {i}"
            );
        }

        nodes[0]
            .shared
            .lock()
            .unwrap()
            .pending
            .push_back(Bytes::from_static(b"write-1"));
        nodes[0].handle.notify_value_available().unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        for (i, node) in nodes.iter().enumerate() {
            let shared = node.shared.lock().unwrap();
            assert!(
                shared
                    .applied
                    .iter()
                    .any(|(_, v)| v == &Bytes::from_static(b"write-1")),
                "node {i} applied {:?}",
                shared.applied
            );
        }

        for node in &nodes {
            node.handle.shutdown();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_run_loop() {
        let mut nodes = spawn_cluster(1);
        let node = nodes.remove(0);
        node.handle.shutdown();
        node.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn commands_fail_once_the_runtime_is_gone() {
        let mut nodes = spawn_cluster(1);
        let node = nodes.remove(0);
        node.handle.shutdown();
        node.task.await.unwrap().unwrap();
        assert!(node.handle.notify_value_available().is_err());
    }
}
