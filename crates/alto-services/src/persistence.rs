//! Persistence adapter — bootstrap files in, peer table out.
//!
//! Startup reads the topology snapshot and the peer table. After every
//! registry mutation the directory hands the current table to a
//! `PeerJournal`. Journaling is best-effort: a failed write is logged and
//! never changes the outcome of the request.

use std::path::{Path, PathBuf};

use alto_core::config::PersistenceConfig;
use alto_core::snapshot::{PeerTable, SnapshotError, TopologySnapshot};

use crate::topology::{TopologyError, TopologyStore};

/// Sink for registry contents after each mutation.
pub trait PeerJournal: Send + Sync {
    fn record(&self, table: &PeerTable);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJournal;

impl PeerJournal for NoJournal {
    fn record(&self, _table: &PeerTable) {}
}

/// Rewrites a JSON peer table file on every mutation.
#[derive(Debug, Clone)]
pub struct JsonPeerFile {
    path: PathBuf,
}

impl JsonPeerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, table: &PeerTable) -> Result<(), String> {
        let text = table.to_json_pretty().map_err(|e| e.to_string())?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        // Write-then-rename so a crash never leaves a truncated table.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| e.to_string())?;
        std::fs::rename(&tmp, &self.path).map_err(|e| e.to_string())
    }
}

impl PeerJournal for JsonPeerFile {
    fn record(&self, table: &PeerTable) {
        if let Err(e) = self.write(table) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to persist peer table");
        }
    }
}

/// Everything read at startup.
#[derive(Debug)]
pub struct Bootstrap {
    pub topology: TopologyStore,
    pub peers: PeerTable,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("topology {0}: {1}")]
    Topology(PathBuf, TopologyError),
}

/// Read the topology snapshot and peer table named by `config`.
///
/// A missing file means "empty". A malformed topology aborts startup; a
/// corrupt graph is never served.
pub fn load_bootstrap(config: &PersistenceConfig) -> Result<Bootstrap, BootstrapError> {
    let topology = match TopologySnapshot::read(&config.topology_path)? {
        Some(snapshot) => TopologyStore::from_snapshot(&snapshot)
            .map_err(|e| BootstrapError::Topology(config.topology_path.clone(), e))?,
        None => {
            tracing::warn!(
                path = %config.topology_path.display(),
                "no topology snapshot, every peer will be unreachable"
            );
            TopologyStore::new()
        }
    };
    tracing::info!(
        nodes = topology.node_count(),
        edges = topology.edge_count(),
        "topology loaded"
    );

    let peers = PeerTable::read(&config.peers_path)?.unwrap_or_default();
    tracing::info!(count = peers.peers.len(), "peer table loaded");

    Ok(Bootstrap { topology, peers })
}
