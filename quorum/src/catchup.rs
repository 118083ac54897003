//! Bulk snapshot transfer for replicas too far behind to replay rounds.
//!
//! The lease owner streams its dataset shard by shard; the receiver
//! rebuilds each shard from scratch and finally learns which log
//! position the snapshot reflects. The writer is pull-based: the
//! runtime asks for the next message whenever the connection can take
//! one, so a slow receiver backpressures the transfer instead of
//! buffering it.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::{CatchupMessage, NodeId, PaxosId, QuorumStore, ShardId, StorageEntry};

/// Sender side, living on the lease owner.
#[derive(Debug)]
pub struct CatchupWriter {
    to: NodeId,
    /// Log position the snapshot reflects.
    paxos_id: PaxosId,
    shards: VecDeque<ShardId>,
    entries: VecDeque<StorageEntry>,
    committed: bool,
    aborted: bool,
}

impl CatchupWriter {
    /// Snapshot the shard list. `paxos_id` must be the last position whose
    /// effects are visible in the store, i.e. the current round minus one.
    pub fn new(to: NodeId, paxos_id: PaxosId, store: &dyn QuorumStore) -> Self {
        let shards: VecDeque<ShardId> = store.shards().into();
        info!(%to, paxos_id, num_shards = shards.len(), "starting catchup transfer");
        Self {
            to,
            paxos_id,
            shards,
            entries: VecDeque::new(),
            committed: false,
            aborted: false,
        }
    }

    #[must_use]
    pub fn to(&self) -> NodeId {
        self.to
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.committed || self.aborted
    }

    /// Cut the transfer short, e.g. on membership change. The receiver
    /// discards everything and retries against the new configuration.
    pub fn abort(&mut self) -> CatchupMessage {
        self.aborted = true;
        self.shards.clear();
        self.entries.clear();
        CatchupMessage::Abort
    }

    /// Next message of the stream, or `None` once the commit went out.
    ///
    /// Only `Set` records are streamed: the receiver's `BeginShard` reset
    /// wipes the shard, so absent keys need no `Delete`. `Delete` exists on
    /// the wire for senders that stream out of a tombstone-keeping store.
    pub fn next_message(&mut self, store: &dyn QuorumStore) -> Option<CatchupMessage> {
        if self.is_complete() {
            return None;
        }
        if let Some(entry) = self.entries.pop_front() {
            return Some(CatchupMessage::Set {
                key: entry.key,
                value: entry.value,
            });
        }
        if let Some(shard_id) = self.shards.pop_front() {
            self.entries = store.shard_entries(shard_id).into();
            debug!(%shard_id, entries = self.entries.len(), "streaming shard");
            return Some(CatchupMessage::BeginShard { shard_id });
        }
        self.committed = true;
        Some(CatchupMessage::Commit {
            paxos_id: self.paxos_id,
        })
    }
}

/// What a received catchup message amounted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatchupEvent {
    Progress,
    /// Transfer finished; the local dataset now reflects `paxos_id`.
    Complete(PaxosId),
    Aborted,
}

/// Receiver side, living on the lagging replica.
#[derive(Debug)]
pub struct CatchupReader {
    active: bool,
    current_shard: Option<ShardId>,
    commit_granularity: u64,
    bytes_since_commit: u64,
}

impl CatchupReader {
    #[must_use]
    pub fn new(commit_granularity: u64) -> Self {
        Self {
            active: false,
            current_shard: None,
            commit_granularity,
            bytes_since_commit: 0,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn begin(&mut self) {
        self.active = true;
        self.current_shard = None;
        self.bytes_since_commit = 0;
    }

    pub fn on_message(
        &mut self,
        msg: &CatchupMessage,
        store: &mut dyn QuorumStore,
    ) -> CatchupEvent {
        if !self.active {
            return CatchupEvent::Progress;
        }
        match msg {
            CatchupMessage::BeginShard { shard_id } => {
                // drop whatever we had; the stream is authoritative
                store.reset_shard(*shard_id);
                self.current_shard = Some(*shard_id);
            }
            CatchupMessage::Set { key, value } => {
                if let Some(shard_id) = self.current_shard {
                    self.track_bytes((key.len() + value.len()) as u64, store);
                    store.set(shard_id, key.clone(), value.clone());
                }
            }
            CatchupMessage::Delete { key } => {
                if let Some(shard_id) = self.current_shard {
                    self.track_bytes(key.len() as u64, store);
                    store.delete(shard_id, key);
                }
            }
            CatchupMessage::Commit { paxos_id } => {
                store.commit();
                self.active = false;
                info!(paxos_id, "catchup transfer committed");
                return CatchupEvent::Complete(*paxos_id);
            }
            CatchupMessage::Abort => {
                self.active = false;
                info!("catchup transfer aborted by sender");
                return CatchupEvent::Aborted;
            }
            CatchupMessage::Request { .. } => {}
        }
        CatchupEvent::Progress
    }

    fn track_bytes(&mut self, bytes: u64, store: &mut dyn QuorumStore) {
        self.bytes_since_commit += bytes;
        if self.bytes_since_commit >= self.commit_granularity {
            store.commit();
            self.bytes_since_commit = 0;
        }
    }
}
