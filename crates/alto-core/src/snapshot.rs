//! Bootstrap file formats.
//!
//! The topology snapshot uses the node-link JSON layout written by the
//! network emulation tooling:
//!
//! ```json
//! {"nodes": [{"id": "h1"}, {"id": "s1"}],
//!  "links": [{"source": "h1", "target": "s1", "bw": 100, "delay": 10}]}
//! ```
//!
//! The peer table maps address keys to endpoints. A bare port number is
//! accepted for compatibility with `{"10.0.0.1": 9000}` style tables, in
//! which case the address key doubles as the host.
//!
//! Only syntax is checked here. Structural checks (duplicates, metric
//! ranges) belong to the topology store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::wire::Endpoint;

// ── Topology ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub nodes: Vec<SnapshotNode>,
    #[serde(default, alias = "edges")]
    pub links: Vec<SnapshotLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    #[serde(deserialize_with = "node_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLink {
    #[serde(deserialize_with = "node_id")]
    pub source: String,
    #[serde(deserialize_with = "node_id")]
    pub target: String,
    /// Link capacity.
    #[serde(rename = "bw", alias = "bandwidth")]
    pub bandwidth: f64,
    pub delay: f64,
}

impl TopologySnapshot {
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(text).map_err(SnapshotError::Json)
    }

    /// Read a snapshot file. A missing file yields `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>, SnapshotError> {
        match read_optional(path)? {
            Some(text) => Self::from_json(&text)
                .map(Some)
                .map_err(|e| e.at(path)),
            None => Ok(None),
        }
    }
}

/// Node ids may be written as strings or integers.
fn node_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

// ── Peer table ────────────────────────────────────────────────────────────────

/// Persisted registry contents, keyed by address key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerTable {
    pub peers: BTreeMap<String, PeerTableEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerTableEntry {
    Endpoint(Endpoint),
    Port(u16),
}

impl PeerTableEntry {
    /// Resolve the entry to an endpoint for the given address key.
    pub fn endpoint(&self, address_key: &str) -> Endpoint {
        match self {
            PeerTableEntry::Endpoint(e) => e.clone(),
            PeerTableEntry::Port(port) => Endpoint::new(address_key, *port),
        }
    }
}

impl PeerTable {
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(text).map_err(SnapshotError::Json)
    }

    /// Read a peer table file. A missing file yields `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>, SnapshotError> {
        match read_optional(path)? {
            Some(text) => Self::from_json(&text)
                .map(Some)
                .map_err(|e| e.at(path)),
            None => Ok(None),
        }
    }

    pub fn insert(&mut self, address_key: impl Into<String>, endpoint: Endpoint) {
        self.peers
            .insert(address_key.into(), PeerTableEntry::Endpoint(endpoint));
    }

    /// Entries resolved to endpoints, in key order.
    pub fn endpoints(&self) -> impl Iterator<Item = (&str, Endpoint)> + '_ {
        self.peers
            .iter()
            .map(|(key, entry)| (key.as_str(), entry.endpoint(key)))
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(SnapshotError::Json)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, SnapshotError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnapshotError::Io(path.to_path_buf(), e)),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed snapshot: {0}")]
    Json(serde_json::Error),
    #[error("malformed snapshot {0}: {1}")]
    JsonAt(PathBuf, serde_json::Error),
}

impl SnapshotError {
    fn at(self, path: &Path) -> Self {
        match self {
            SnapshotError::Json(e) => SnapshotError::JsonAt(path.to_path_buf(), e),
            other => other,
        }
    }
}
