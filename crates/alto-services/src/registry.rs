//! Peer registry — address key → reachable endpoint.
//!
//! Plain data, no lock. Only the directory mutates it, and always together
//! with the topology store.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use alto_core::wire::Endpoint;

/// One registered peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub address_key: String,
    pub endpoint: Endpoint,
    /// Unix seconds at registration.
    pub registered_at: u64,
    /// Last register or heartbeat.
    pub last_seen: Instant,
}

impl PeerRecord {
    pub fn new(address_key: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            address_key: address_key.into(),
            endpoint,
            registered_at: unix_now(),
            last_seen: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("peer {0} is already registered")]
    Conflict(String),
    #[error("peer {0} is not registered")]
    NotFound(String),
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address_key: &str, endpoint: Endpoint) -> Result<(), RegistryError> {
        if self.peers.contains_key(address_key) {
            return Err(RegistryError::Conflict(address_key.to_string()));
        }
        self.peers.insert(
            address_key.to_string(),
            PeerRecord::new(address_key, endpoint),
        );
        Ok(())
    }

    pub fn unregister(&mut self, address_key: &str) -> Result<PeerRecord, RegistryError> {
        self.peers
            .remove(address_key)
            .ok_or_else(|| RegistryError::NotFound(address_key.to_string()))
    }

    pub fn is_registered(&self, address_key: &str) -> bool {
        self.peers.contains_key(address_key)
    }

    pub fn get(&self, address_key: &str) -> Option<&PeerRecord> {
        self.peers.get(address_key)
    }

    /// Every peer except `exclude`. Borrows the registry, so the sequence
    /// is exactly the state at call time and ends before any mutation.
    pub fn list_others<'a>(&'a self, exclude: &'a str) -> impl Iterator<Item = &'a PeerRecord> + 'a {
        self.peers
            .values()
            .filter(move |p| p.address_key != exclude)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Refresh `last_seen`. False if the key is not registered.
    pub fn touch(&mut self, address_key: &str) -> bool {
        match self.peers.get_mut(address_key) {
            Some(record) => {
                record.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Keys not seen within `ttl`, sorted.
    pub fn expired(&self, ttl: Duration) -> Vec<String> {
        let mut keys: Vec<String> = self
            .peers
            .values()
            .filter(|p| p.last_seen.elapsed() >= ttl)
            .map(|p| p.address_key.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.peers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
