//! HTTP API handlers — exposes directory state as JSON.

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use alto_core::wire::Endpoint;
use alto_services::{ConnectionTable, ResolveError, SharedDirectory};

#[derive(Clone)]
pub struct ApiState {
    pub directory: SharedDirectory,
    pub connections: ConnectionTable,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub peers: usize,
    pub nodes: usize,
    pub edges: usize,
    pub active_connections: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.directory.snapshot().await;
    Json(StatusResponse {
        peers: snapshot.peers.len(),
        nodes: snapshot.nodes,
        edges: snapshot.edges,
        active_connections: state.connections.len(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize, Deserialize)]
pub struct PeerInfo {
    pub address_key: String,
    pub endpoint: Endpoint,
    pub registered_at: u64,
    pub last_seen_secs: u64,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .directory
        .snapshot()
        .await
        .peers
        .into_iter()
        .map(|p| PeerInfo {
            last_seen_secs: p.last_seen.elapsed().as_secs(),
            address_key: p.address_key,
            endpoint: p.endpoint,
            registered_at: p.registered_at,
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── /connections ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub remote: String,
    pub open_secs: u64,
    pub requests: u64,
}

pub async fn handle_connections(State(state): State<ApiState>) -> Json<Vec<ConnectionInfo>> {
    let mut connections: Vec<ConnectionInfo> = state
        .connections
        .iter()
        .map(|e| {
            let meta = e.value();
            ConnectionInfo {
                id: *e.key(),
                remote: meta.remote_addr.to_string(),
                open_secs: meta.opened_at.elapsed().as_secs(),
                requests: meta.request_count(),
            }
        })
        .collect();
    connections.sort_by_key(|c| c.id);
    Json(connections)
}

// ── /resolve/{address_key} ────────────────────────────────────────────────────

const DEFAULT_RANK_LIMIT: usize = 16;

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct ResolveResponse {
    pub address_key: String,
    /// Best first.
    pub candidates: Vec<CandidateInfo>,
}

#[derive(Serialize, Deserialize)]
pub struct CandidateInfo {
    pub address_key: String,
    pub endpoint: Endpoint,
    pub cost: f64,
    pub hops: u32,
    pub bottleneck_bandwidth: f64,
    pub total_delay: f64,
}

pub async fn handle_resolve(
    State(state): State<ApiState>,
    Path(address_key): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_RANK_LIMIT);
    let ranked = match state.directory.rank(&address_key, limit).await {
        Ok(ranked) => ranked,
        Err(ResolveError::NotRegistered(_)) => {
            return Err((StatusCode::NOT_FOUND, "not_registered".to_string()))
        }
        Err(e) => {
            tracing::error!(error = %e, "status resolve failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let candidates = ranked
        .into_iter()
        .map(|c| CandidateInfo {
            address_key: c.address_key,
            endpoint: c.endpoint,
            cost: c.cost.score,
            hops: c.cost.path.hops,
            bottleneck_bandwidth: c.cost.path.bottleneck_bandwidth,
            total_delay: c.cost.path.total_delay,
        })
        .collect();

    Ok(Json(ResolveResponse {
        address_key,
        candidates,
    }))
}
