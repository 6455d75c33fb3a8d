//! Best-peer resolution — a linear scan over every other registered peer.
//!
//! Stateless. Callers hand in a registry and a topology that are borrowed
//! from the same lock guard, so both views come from one instant.

use std::cmp::Ordering;

use alto_core::wire::{Endpoint, ResolvedPeer};

use crate::cost::{cost, Cost, CostError, CostPolicy};
use crate::registry::PeerRegistry;
use crate::topology::TopologyStore;

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub address_key: String,
    pub endpoint: Endpoint,
    pub cost: Cost,
}

impl Candidate {
    /// Cheaper first, then the smaller address key.
    fn order(&self, other: &Self) -> Ordering {
        self.cost
            .score
            .total_cmp(&other.cost.score)
            .then_with(|| self.address_key.cmp(&other.address_key))
    }
}

impl From<Candidate> for ResolvedPeer {
    fn from(c: Candidate) -> Self {
        ResolvedPeer {
            address_key: c.address_key,
            endpoint: c.endpoint,
            cost: c.cost.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("peer {0} is not registered")]
    NotRegistered(String),
    #[error("no reachable peer for {0}")]
    NoPeerFound(String),
    /// Registry and topology disagree. Only a locking bug can cause this.
    #[error("registry and topology disagree about {0}")]
    Inconsistent(String),
}

/// Every reachable candidate for `requester`, best first.
pub fn rank(
    registry: &PeerRegistry,
    topology: &TopologyStore,
    policy: &dyn CostPolicy,
    requester: &str,
) -> Result<Vec<Candidate>, ResolveError> {
    if !registry.is_registered(requester) {
        return Err(ResolveError::NotRegistered(requester.to_string()));
    }
    if !topology.is_attached(requester) {
        return Err(ResolveError::Inconsistent(requester.to_string()));
    }

    let mut candidates = Vec::new();
    for peer in registry.list_others(requester) {
        if !topology.is_attached(&peer.address_key) {
            return Err(ResolveError::Inconsistent(peer.address_key.clone()));
        }
        match cost(topology, policy, requester, &peer.address_key) {
            Ok(c) => candidates.push(Candidate {
                address_key: peer.address_key.clone(),
                endpoint: peer.endpoint.clone(),
                cost: c,
            }),
            Err(CostError::Unreachable(..)) => {
                tracing::trace!(from = requester, to = %peer.address_key, "candidate unreachable");
            }
        }
    }

    candidates.sort_by(Candidate::order);
    Ok(candidates)
}

/// The single best candidate for `requester`.
pub fn resolve(
    registry: &PeerRegistry,
    topology: &TopologyStore,
    policy: &dyn CostPolicy,
    requester: &str,
) -> Result<Candidate, ResolveError> {
    rank(registry, topology, policy, requester)?
        .into_iter()
        .next()
        .ok_or_else(|| ResolveError::NoPeerFound(requester.to_string()))
}
