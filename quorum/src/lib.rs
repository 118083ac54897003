//! Quorum consensus and replication core.
//!
//! A cluster of nodes agrees on an ordered log of opaque values, one
//! single-decree Paxos round per log position. On top of the log sit a
//! lease-based leadership election (so exactly one node proposes at a
//! time and multi-paxos can skip the prepare phase) and a bulk catchup
//! protocol for replicas too far behind to replay rounds one by one.
//!
//! # Architecture
//!
//! - [`ReplicatedLog`]: sequences rounds, drives [`PaxosProposer`] and
//!   [`PaxosAcceptor`], detects lag
//! - [`PaxosLease`]: proposer, acceptor and learner for the leadership
//!   lease, multiplexed behind one facade
//! - [`CatchupWriter`] / [`CatchupReader`]: snapshot transfer
//! - [`QuorumRuntime`]: tokio task tying the above to an inbox of
//!   [`Envelope`]s and to the embedding application's [`QuorumContext`]
//!
//! The embedder implements [`QuorumContext`] (storage, transport, value
//! supply, apply callbacks) and talks to the running task through a
//! [`QuorumHandle`].

#![warn(clippy::pedantic)]

mod acceptor;
mod catchup;
mod config;
mod context;
mod error;
mod lease;
mod log;
mod messages;
mod proposer;
mod quorum;
mod runtime;
mod storage;
mod transport;
mod types;
mod wire;

pub use acceptor::PaxosAcceptor;
pub use catchup::{CatchupEvent, CatchupReader, CatchupWriter};
pub use config::{QuorumConfig, ReplicationConfig};
pub use context::{AppendOutcome, QuorumContext};
pub use error::{
    NodeContextInfo, OperationContext, QuorumContextInfo, RuntimeError, WireError,
};
pub use lease::{LeaseAcceptor, LeaseLearner, LeaseProposer, PaxosLease};
pub use log::{DUMMY_VALUE, ReplicatedLog};
pub use messages::{CatchupMessage, Envelope, LeaseMessage, PaxosMessage, QuorumMessage};
pub use proposer::PaxosProposer;
pub use quorum::{Quorum, Vote};
pub use runtime::{QuorumHandle, QuorumRuntime};
pub use storage::{AcceptedRecord, AcceptorRecord, MemoryStore, QuorumStore, StorageEntry};
pub use transport::{ChannelTransport, QuorumTransport};
pub use types::{NodeId, PaxosId, ProposalId, QuorumId, RunId, ShardId};
pub use wire::{ClusterCodec, decode_envelope, encode_envelope};
