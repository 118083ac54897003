//! Durable state behind one quorum.
//!
//! Consensus only needs three things from storage: the acceptor's promise
//! and accepted value for the round in flight, a bounded cache of recently
//! chosen rounds to answer `RequestChosen`, and the replicated dataset
//! itself, sharded, for bulk catchup. [`MemoryStore`] is the in-process
//! implementation; embedders with a real storage engine implement
//! [`QuorumStore`] over it.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{PaxosId, ProposalId, RunId, ShardId};

/// Value accepted by this node's acceptor in the current round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedRecord {
    pub proposal_id: ProposalId,
    pub run_id: RunId,
    pub value: Bytes,
}

/// Acceptor state that must survive a restart.
///
/// Losing this record and answering a later prepare would let the node
/// promise against an id it already accepted under, breaking safety.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptorRecord {
    pub paxos_id: PaxosId,
    pub promised_proposal_id: ProposalId,
    pub accepted: Option<AcceptedRecord>,
}

/// One key/value pair of a shard, in key order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: Bytes,
    pub value: Bytes,
}

/// Storage seam of one quorum.
///
/// All writes must be durable once the call returns; the consensus code
/// answers peers immediately afterwards.
pub trait QuorumStore: Send {
    fn acceptor_record(&self) -> Option<AcceptorRecord>;
    fn save_acceptor_record(&mut self, record: &AcceptorRecord);

    /// Remember the value chosen at `paxos_id` so lagging peers can be
    /// answered with `LearnValue`. Implementations keep a bounded window;
    /// rounds that fall out of it force peers into bulk catchup.
    fn save_round(&mut self, paxos_id: PaxosId, value: Bytes);
    fn round(&self, paxos_id: PaxosId) -> Option<Bytes>;

    /// Shards of the replicated dataset, in transfer order.
    fn shards(&self) -> Vec<ShardId>;
    /// Snapshot of one shard's entries, in key order.
    fn shard_entries(&self, shard_id: ShardId) -> Vec<StorageEntry>;

    /// Drop and recreate a shard before receiving its snapshot.
    fn reset_shard(&mut self, shard_id: ShardId);
    fn set(&mut self, shard_id: ShardId, key: Bytes, value: Bytes);
    fn delete(&mut self, shard_id: ShardId, key: &[u8]);

    /// Flush buffered writes. Called by the catchup receiver at
    /// granularity boundaries and at commit.
    fn commit(&mut self);
}

/// Heap-backed store, used by tests and single-process embeddings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    acceptor: Option<AcceptorRecord>,
    rounds: BTreeMap<PaxosId, Bytes>,
    round_cache_size: usize,
    shards: BTreeMap<ShardId, BTreeMap<Bytes, Bytes>>,
}

impl MemoryStore {
    const DEFAULT_ROUND_CACHE: usize = 1000;

    #[must_use]
    pub fn new() -> Self {
        Self {
            round_cache_size: Self::DEFAULT_ROUND_CACHE,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_round_cache_size(mut self, rounds: usize) -> Self {
        self.round_cache_size = rounds;
        self
    }

    /// Create an empty shard if it does not exist yet.
    pub fn create_shard(&mut self, shard_id: ShardId) {
        self.shards.entry(shard_id).or_default();
    }

    #[must_use]
    pub fn get(&self, shard_id: ShardId, key: &[u8]) -> Option<&Bytes> {
        self.shards.get(&shard_id)?.get(key)
    }
}

impl QuorumStore for MemoryStore {
    fn acceptor_record(&self) -> Option<AcceptorRecord> {
        self.acceptor.clone()
    }

    fn save_acceptor_record(&mut self, record: &AcceptorRecord) {
        self.acceptor = Some(record.clone());
    }

    fn save_round(&mut self, paxos_id: PaxosId, value: Bytes) {
        self.rounds.insert(paxos_id, value);
        while self.rounds.len() > self.round_cache_size {
            self.rounds.pop_first();
        }
    }

    fn round(&self, paxos_id: PaxosId) -> Option<Bytes> {
        self.rounds.get(&paxos_id).cloned()
    }

    fn shards(&self) -> Vec<ShardId> {
        self.shards.keys().copied().collect()
    }

    fn shard_entries(&self, shard_id: ShardId) -> Vec<StorageEntry> {
        self.shards
            .get(&shard_id)
            .into_iter()
            .flatten()
            .map(|(key, value)| StorageEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    fn reset_shard(&mut self, shard_id: ShardId) {
        self.shards.insert(shard_id, BTreeMap::new());
    }

    fn set(&mut self, shard_id: ShardId, key: Bytes, value: Bytes) {
        self.shards.entry(shard_id).or_default().insert(key, value);
    }

    fn delete(&mut self, shard_id: ShardId, key: &[u8]) {
        if let Some(shard) = self.shards.get_mut(&shard_id) {
            shard.remove(key);
        }
    }

    fn commit(&mut self) {}
}
