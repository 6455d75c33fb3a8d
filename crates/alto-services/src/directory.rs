//! The directory — one service object owning the peer registry and the
//! topology store behind a single reader/writer lock.
//!
//! Register and unregister take the write lock and update both structures
//! inside one critical section, so no reader can observe a peer in one
//! structure and not the other. Resolution takes the read lock for the
//! whole scan. Neither structure is reachable except through this lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use alto_core::snapshot::PeerTable;
use alto_core::wire::Endpoint;

use crate::cost::SharedPolicy;
use crate::persistence::{Bootstrap, NoJournal, PeerJournal};
use crate::registry::{PeerRecord, PeerRegistry};
use crate::resolver::{self, Candidate, ResolveError};
use crate::topology::TopologyStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("peer {0} is already registered")]
    Conflict(String),
    #[error("peer {0} is not registered")]
    NotFound(String),
    /// Registry and topology disagree. Only a locking bug can cause this.
    #[error("registry and topology diverged: {0}")]
    Diverged(String),
}

/// Registry and topology, only ever borrowed together.
#[derive(Debug, Default)]
pub struct DirectoryState {
    registry: PeerRegistry,
    topology: TopologyStore,
}

impl DirectoryState {
    pub fn new(topology: TopologyStore) -> Self {
        Self {
            registry: PeerRegistry::new(),
            topology,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    fn register(&mut self, address_key: &str, endpoint: Endpoint) -> Result<(), DirectoryError> {
        if self.registry.is_registered(address_key) {
            return Err(DirectoryError::Conflict(address_key.to_string()));
        }
        // Topology first: if it refuses, nothing has been touched.
        self.topology
            .attach_peer(address_key)
            .map_err(|e| DirectoryError::Diverged(e.to_string()))?;
        self.registry
            .register(address_key, endpoint)
            .map_err(|e| DirectoryError::Diverged(e.to_string()))
    }

    fn unregister(&mut self, address_key: &str) -> Result<PeerRecord, DirectoryError> {
        if !self.registry.is_registered(address_key) {
            return Err(DirectoryError::NotFound(address_key.to_string()));
        }
        self.topology
            .detach_peer(address_key)
            .map_err(|e| DirectoryError::Diverged(e.to_string()))?;
        self.registry
            .unregister(address_key)
            .map_err(|e| DirectoryError::Diverged(e.to_string()))
    }

    /// Registered keys must equal attached topology nodes.
    pub fn check_consistency(&self) -> Result<(), DirectoryError> {
        let registered = self.registry.keys();
        let attached = self.topology.attached_ids();
        if registered == attached {
            return Ok(());
        }
        let only_registry: Vec<&str> = registered
            .iter()
            .filter(|k| !attached.contains(k))
            .copied()
            .collect();
        let only_topology: Vec<&str> = attached
            .iter()
            .filter(|k| !registered.contains(k))
            .copied()
            .collect();
        Err(DirectoryError::Diverged(format!(
            "registry only {only_registry:?}, topology only {only_topology:?}"
        )))
    }

    fn peer_table(&self) -> PeerTable {
        let mut table = PeerTable::default();
        for peer in self.registry.iter() {
            table.insert(peer.address_key.clone(), peer.endpoint.clone());
        }
        table
    }
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    /// Sorted by address key.
    pub peers: Vec<PeerRecord>,
    pub nodes: usize,
    pub edges: usize,
}

/// The shared directory service.
pub struct Directory {
    state: RwLock<DirectoryState>,
    policy: SharedPolicy,
    journal: Arc<dyn PeerJournal>,
}

pub type SharedDirectory = Arc<Directory>;

impl Directory {
    pub fn new(topology: TopologyStore, policy: SharedPolicy) -> Self {
        Self {
            state: RwLock::new(DirectoryState::new(topology)),
            policy,
            journal: Arc::new(NoJournal),
        }
    }

    /// Build from startup files, registering every peer in the table.
    ///
    /// Peers are seeded without journaling; the table already holds them.
    pub fn from_bootstrap(
        bootstrap: Bootstrap,
        policy: SharedPolicy,
        journal: Arc<dyn PeerJournal>,
    ) -> Result<Self, DirectoryError> {
        let mut state = DirectoryState::new(bootstrap.topology);
        for (key, endpoint) in bootstrap.peers.endpoints() {
            state.register(key, endpoint)?;
        }
        state.check_consistency()?;
        tracing::info!(peers = state.registry.len(), "directory seeded");
        Ok(Self {
            state: RwLock::new(state),
            policy,
            journal,
        })
    }

    pub fn with_journal(mut self, journal: Arc<dyn PeerJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn shared(self) -> SharedDirectory {
        Arc::new(self)
    }

    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }

    /// Atomically add the peer to the registry and the topology.
    pub async fn register(&self, address_key: &str, endpoint: Endpoint) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        state.register(address_key, endpoint.clone())?;
        self.journal.record(&state.peer_table());
        tracing::info!(address_key, endpoint = %endpoint, "peer registered");
        Ok(())
    }

    /// Atomically remove the peer from the registry and the topology.
    pub async fn unregister(&self, address_key: &str) -> Result<PeerRecord, DirectoryError> {
        let mut state = self.state.write().await;
        let record = state.unregister(address_key)?;
        self.journal.record(&state.peer_table());
        tracing::info!(address_key, "peer unregistered");
        Ok(record)
    }

    /// Refresh a peer's liveness.
    pub async fn heartbeat(&self, address_key: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        if state.registry.touch(address_key) {
            Ok(())
        } else {
            Err(DirectoryError::NotFound(address_key.to_string()))
        }
    }

    /// Unregister every peer silent for longer than `ttl`, in one critical
    /// section. Returns the removed keys.
    pub async fn expire(&self, ttl: Duration) -> Result<Vec<String>, DirectoryError> {
        let mut state = self.state.write().await;
        let stale = state.registry.expired(ttl);
        for key in &stale {
            state.unregister(key)?;
        }
        if !stale.is_empty() {
            self.journal.record(&state.peer_table());
        }
        Ok(stale)
    }

    pub async fn is_registered(&self, address_key: &str) -> bool {
        self.state.read().await.registry.is_registered(address_key)
    }

    /// Best transfer partner for `requester`.
    pub async fn resolve(&self, requester: &str) -> Result<Candidate, ResolveError> {
        let state = self.state.read().await;
        resolver::resolve(
            &state.registry,
            &state.topology,
            self.policy.as_ref(),
            requester,
        )
    }

    /// All reachable candidates for `requester`, best first, at most `limit`.
    pub async fn rank(&self, requester: &str, limit: usize) -> Result<Vec<Candidate>, ResolveError> {
        let state = self.state.read().await;
        let mut ranked = resolver::rank(
            &state.registry,
            &state.topology,
            self.policy.as_ref(),
            requester,
        )?;
        ranked.truncate(limit);
        Ok(ranked)
    }

    pub async fn snapshot(&self) -> DirectorySnapshot {
        let state = self.state.read().await;
        let mut peers: Vec<PeerRecord> = state.registry.iter().cloned().collect();
        peers.sort_by(|a, b| a.address_key.cmp(&b.address_key));
        DirectorySnapshot {
            peers,
            nodes: state.topology.node_count(),
            edges: state.topology.edge_count(),
        }
    }

    pub async fn check_consistency(&self) -> Result<(), DirectoryError> {
        self.state.read().await.check_consistency()
    }
}
