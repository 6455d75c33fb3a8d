//! Connection table — one entry per open client session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

/// What the status API shows about an open session.
#[derive(Debug)]
pub struct ConnectionMeta {
    pub remote_addr: SocketAddr,
    pub opened_at: Instant,
    /// Requests answered so far, malformed ones included.
    pub requests: AtomicU64,
}

impl ConnectionMeta {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            opened_at: Instant::now(),
            requests: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Open sessions keyed by connection id — shared across all tasks.
pub type ConnectionTable = Arc<DashMap<u64, ConnectionMeta>>;

pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}
