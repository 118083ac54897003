//! Learner side of the lease protocol.
//!
//! The learner is each node's local answer to "who leads right now".
//! The owner trusts the grantor's `local_expire_time` verbatim because
//! it was measured on this node's own clock; everyone else derives a
//! shorter expiry from the duration, so the owner always believes it
//! leads at least as long as its peers do.

use crate::{LeaseMessage, NodeId};

#[derive(Clone, Copy, Debug)]
struct Learned {
    owner: NodeId,
    expire_time: u64,
}

#[derive(Debug)]
pub struct LeaseLearner {
    node_id: NodeId,
    safety_margin: u64,
    learned: Option<Learned>,
}

impl LeaseLearner {
    #[must_use]
    pub fn new(node_id: NodeId, safety_margin: u64) -> Self {
        Self {
            node_id,
            safety_margin,
            learned: None,
        }
    }

    /// Returns the owner if the message establishes or refreshes a lease.
    pub fn on_learn_chosen(&mut self, msg: &LeaseMessage, now: u64) -> Option<NodeId> {
        let LeaseMessage::LearnChosen {
            lease_owner,
            duration,
            local_expire_time,
            ..
        } = msg
        else {
            return None;
        };
        let expire_time = if *lease_owner == self.node_id {
            *local_expire_time
        } else {
            (now + duration).saturating_sub(self.safety_margin)
        };
        if expire_time <= now {
            return None;
        }
        self.learned = Some(Learned {
            owner: *lease_owner,
            expire_time,
        });
        Some(*lease_owner)
    }

    #[must_use]
    pub fn lease_owner(&self, now: u64) -> Option<NodeId> {
        self.learned
            .filter(|l| l.expire_time > now)
            .map(|l| l.owner)
    }

    #[must_use]
    pub fn is_lease_owner(&self, now: u64) -> bool {
        self.lease_owner(now) == Some(self.node_id)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.learned.map(|l| l.expire_time)
    }

    /// Clear an expired lease. Returns true when this call observed the
    /// expiry, so the caller can notify exactly once.
    pub fn take_expired(&mut self, now: u64) -> bool {
        if self.learned.is_some_and(|l| l.expire_time <= now) {
            self.learned = None;
            true
        } else {
            false
        }
    }
}
