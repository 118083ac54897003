//! Embedding seam for one replicated quorum.

use bytes::Bytes;

use crate::{NodeId, PaxosId, Quorum, QuorumId, QuorumStore, QuorumTransport};

/// Result of handing a chosen value to the embedding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The value was applied; the log moves to the next round and, if this
    /// node is leader, immediately proposes the next pending value.
    Complete,
    /// The value needs asynchronous work. The embedder must later call
    /// `ReplicatedLog::on_append_complete` to resume the round pipeline.
    Pending,
}

/// Everything the replication machinery needs from its embedding.
///
/// One implementation per quorum. Lease state flows in both directions:
/// the runtime pushes `on_learn_lease` / `on_lease_timeout` into the
/// context, and the log reads it back through the `is_lease_owner` family
/// when deciding whether this node may propose.
pub trait QuorumContext: Send {
    fn quorum(&self) -> &Quorum;
    fn quorum_id(&self) -> QuorumId;

    fn database(&mut self) -> &mut dyn QuorumStore;
    fn transport(&mut self) -> &mut dyn QuorumTransport;

    /// Lease owner and fully caught up, so appends skip the prepare phase.
    fn is_leader(&self) -> bool;
    fn is_lease_owner(&self) -> bool;
    fn is_lease_known(&self) -> bool;
    fn lease_owner(&self) -> Option<NodeId>;

    /// Highest log position known chosen and applied, from stable storage.
    fn paxos_id(&self) -> PaxosId;
    fn set_paxos_id(&mut self, paxos_id: PaxosId);

    /// Next value waiting to be replicated, if any. Taking the value hands
    /// ownership of it to the log for the duration of the round.
    fn next_value(&mut self) -> Option<Bytes>;

    /// A value was chosen at `paxos_id`. `own_append` is true when the
    /// value completed an uninterrupted multi-paxos append by this leader,
    /// so the embedder may complete client requests instead of replaying.
    fn on_append(&mut self, paxos_id: PaxosId, value: Bytes, own_append: bool) -> AppendOutcome;

    fn on_learn_lease(&mut self, owner: NodeId);
    fn on_lease_timeout(&mut self);
    /// First transition into multi-paxos leadership for this node.
    fn on_is_leader(&mut self);

    fn on_start_catchup(&mut self);
    fn on_catchup_complete(&mut self, paxos_id: PaxosId);

    /// Pause participation while local state is inconsistent, e.g. during
    /// catchup while shards are being rewritten.
    fn stop_replication(&mut self);
    fn continue_replication(&mut self);
    /// True while replication is stopped.
    fn is_paxos_blocked(&self) -> bool;
}
