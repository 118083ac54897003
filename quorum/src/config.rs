//! Replication identity and timing configuration.

use crate::{NodeId, ProposalId, RunId};

/// Identity of this process within the cluster.
///
/// `run_id` must be loaded from stable storage and incremented once per
/// process start by the embedding application, before any quorum is created.
#[derive(Clone, Copy, Debug)]
pub struct ReplicationConfig {
    pub node_id: NodeId,
    pub run_id: RunId,
}

impl ReplicationConfig {
    #[must_use]
    pub fn new(node_id: NodeId, run_id: RunId) -> Self {
        Self { node_id, run_id }
    }

    /// Next globally unique proposal identifier, strictly greater than `prev`.
    #[must_use]
    pub fn next_proposal_id(&self, prev: ProposalId) -> ProposalId {
        prev.next(self.run_id, self.node_id)
    }
}

/// Timing and threshold knobs for one quorum. All durations in milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct QuorumConfig {
    /// Prepare/propose round timeout before restarting with a higher id.
    pub paxos_timeout: u64,
    /// Retry cadence while competing for the lease.
    pub acquire_lease_timeout: u64,
    /// Duration of a granted lease.
    pub max_lease_time: u64,
    /// Subtracted from a learned lease's duration to absorb clock drift
    /// and message latency.
    pub lease_safety_margin: u64,
    /// Minimum interval between RequestChosen messages to the same peer.
    pub request_chosen_timeout: u64,
    /// Idle leader appends a dummy value at this interval.
    pub canary_timeout: u64,
    /// Lag (in log positions) beyond which bulk catchup replaces replay.
    pub catchup_threshold: u64,
    /// Bytes applied between storage commits on the catchup receiver.
    pub catchup_commit_granularity: u64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            paxos_timeout: 1000,
            acquire_lease_timeout: 2000,
            max_lease_time: 7000,
            lease_safety_margin: 500,
            request_chosen_timeout: 1000,
            canary_timeout: 60 * 1000,
            catchup_threshold: 1000,
            catchup_commit_granularity: 64 * 1024,
        }
    }
}

impl QuorumConfig {
    #[must_use]
    pub fn with_paxos_timeout(mut self, ms: u64) -> Self {
        self.paxos_timeout = ms;
        self
    }

    #[must_use]
    pub fn with_lease_times(mut self, acquire_ms: u64, max_lease_ms: u64) -> Self {
        self.acquire_lease_timeout = acquire_ms;
        self.max_lease_time = max_lease_ms;
        self
    }

    #[must_use]
    pub fn with_catchup_threshold(mut self, positions: u64) -> Self {
        self.catchup_threshold = positions;
        self
    }

    #[must_use]
    pub fn with_canary_timeout(mut self, ms: u64) -> Self {
        self.canary_timeout = ms;
        self
    }
}
