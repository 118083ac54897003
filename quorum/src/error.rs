//! Error types and structured `error_stack` context types.

use std::fmt;

use crate::{NodeId, QuorumId};

/// Wire decoding / transport error.
#[derive(Debug)]
pub enum WireError {
    /// The frame ended before all fields of the announced subtype were read.
    Truncated,
    /// A numeric field was not a decimal integer.
    BadInteger,
    /// Unknown one-byte protocol identifier.
    BadProtocol(u8),
    /// Unknown subtype for an otherwise valid protocol.
    BadSubtype(u8),
    /// A `:` separator was missing where one was required.
    MissingSeparator,
    Io(std::io::Error),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "frame truncated"),
            WireError::BadInteger => write!(f, "malformed integer field"),
            WireError::BadProtocol(p) => write!(f, "unknown protocol id {:?}", *p as char),
            WireError::BadSubtype(t) => write!(f, "unknown message subtype {:?}", *t as char),
            WireError::MissingSeparator => write!(f, "missing field separator"),
            WireError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e)
    }
}

impl From<WireError> for std::io::Error {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io_err) => io_err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Top-level failure of a quorum runtime task.
#[derive(Debug)]
pub enum RuntimeError {
    /// All inbound message senders dropped.
    TransportClosed,
    /// The command channel to the embedding application dropped.
    CommandChannelClosed,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TransportClosed => write!(f, "transport inbox closed"),
            RuntimeError::CommandChannelClosed => write!(f, "command channel closed"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Error context: quorum.
#[derive(Debug, Clone, Copy)]
pub struct QuorumContextInfo {
    pub quorum_id: QuorumId,
}

impl QuorumContextInfo {
    #[must_use]
    pub fn new(quorum_id: QuorumId) -> Self {
        Self { quorum_id }
    }
}

impl fmt::Display for QuorumContextInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quorum_id)
    }
}

/// Error context: node.
#[derive(Debug, Clone, Copy)]
pub struct NodeContextInfo {
    pub node_id: NodeId,
}

impl NodeContextInfo {
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }
}

impl fmt::Display for NodeContextInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_id)
    }
}

/// Error context: what operation was in progress.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: &'static str,
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "while {}", self.operation)
    }
}

impl OperationContext {
    pub const RUNNING_QUORUM: Self = Self {
        operation: "running quorum event loop",
    };
    pub const PROPOSING: Self = Self {
        operation: "proposing a value",
    };
    pub const ACQUIRING_LEASE: Self = Self {
        operation: "acquiring leadership lease",
    };
}
