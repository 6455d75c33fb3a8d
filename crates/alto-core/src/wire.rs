//! ALTO wire format — framed request/response messages.
//!
//! Every message on a session is one frame: a 4-byte big-endian length
//! followed by a UTF-8 JSON payload. Requests carry a `type` discriminator,
//! responses a `status` discriminator. One request always yields exactly one
//! response, so a client may pipeline requests on a single connection.
//!
//! Changing a field name or a discriminator here is a protocol break.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum frame payload in bytes. Larger frames are a framing error.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_FIELD_BYTES: usize = 4;

/// Default TCP port for the directory service.
pub const DEFAULT_PORT: u16 = 5000;

/// Longest accepted `address_key`, in bytes.
pub const MAX_ADDRESS_KEY_LEN: usize = 255;

/// Longest accepted `endpoint.host`, in bytes.
pub const MAX_HOST_LEN: usize = 255;

/// `malformed` reasons are cut to this many bytes.
pub const MAX_REASON_LEN: usize = 256;

/// Upper bound on an encoded response. With the field caps above, even a
/// fully escaped resolve reply stays below it.
pub const MAX_RESPONSE_LENGTH: usize = 4 * 1024;

/// Build the frame codec shared by the server and clients.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_BYTES)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Codec for the server's write half. Independent of the request limit so
/// that an accepted request can always be answered.
pub fn response_codec() -> LengthDelimitedCodec {
    frame_codec(MAX_RESPONSE_LENGTH)
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Where a peer accepts file-transfer connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A client request. One frame, one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Announce a peer and where it can be reached.
    Register {
        address_key: String,
        endpoint: Endpoint,
    },
    /// Withdraw a peer.
    Unregister { address_key: String },
    /// Ask for the best transfer partner of a registered peer.
    Resolve { address_key: String },
    /// Refresh a peer's liveness timestamp.
    Heartbeat { address_key: String },
    /// End the session after the response is written.
    Close,
}

impl Request {
    /// Decode and validate a request frame.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.is_empty() {
            return Err(WireError::EmptyFrame);
        }
        let request: Request = serde_json::from_slice(frame).map_err(WireError::Json)?;
        request.validate()?;
        Ok(request)
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(WireError::Json)
    }

    /// Short name of the request kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::Unregister { .. } => "unregister",
            Request::Resolve { .. } => "resolve",
            Request::Heartbeat { .. } => "heartbeat",
            Request::Close => "close",
        }
    }

    pub fn address_key(&self) -> Option<&str> {
        match self {
            Request::Register { address_key, .. }
            | Request::Unregister { address_key }
            | Request::Resolve { address_key }
            | Request::Heartbeat { address_key } => Some(address_key),
            Request::Close => None,
        }
    }

    fn validate(&self) -> Result<(), WireError> {
        if let Some(key) = self.address_key() {
            if key.trim().is_empty() {
                return Err(WireError::EmptyAddressKey);
            }
            if key.len() > MAX_ADDRESS_KEY_LEN {
                return Err(WireError::TooLong("address_key", key.len()));
            }
        }
        if let Request::Register { endpoint, .. } = self {
            if endpoint.host.trim().is_empty() {
                return Err(WireError::InvalidEndpoint("empty host".into()));
            }
            if endpoint.host.len() > MAX_HOST_LEN {
                return Err(WireError::TooLong("host", endpoint.host.len()));
            }
            if endpoint.port == 0 {
                return Err(WireError::InvalidEndpoint("port 0".into()));
            }
        }
        Ok(())
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// The peer chosen by a successful resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPeer {
    pub address_key: String,
    pub endpoint: Endpoint,
    /// Policy score, lower is better.
    pub cost: f64,
}

/// A server response. Every variant is distinguishable by `status` so
/// callers can tell "try another peer" from "fix your client".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<ResolvedPeer>,
    },
    Conflict,
    NotFound,
    NotRegistered,
    NoPeerFound,
    Malformed { reason: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok { peer: None }
    }

    pub fn resolved(peer: ResolvedPeer) -> Self {
        Response::Ok { peer: Some(peer) }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_REASON_LEN {
            let mut end = MAX_REASON_LEN;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Response::Malformed { reason }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.is_empty() {
            return Err(WireError::EmptyFrame);
        }
        serde_json::from_slice(frame).map_err(WireError::Json)
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(WireError::Json)
    }

    /// Status code string as it appears on the wire.
    pub fn status(&self) -> &'static str {
        match self {
            Response::Ok { .. } => "ok",
            Response::Conflict => "conflict",
            Response::NotFound => "not_found",
            Response::NotRegistered => "not_registered",
            Response::NoPeerFound => "no_peer_found",
            Response::Malformed { .. } => "malformed",
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting a frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("invalid message: {0}")]
    Json(serde_json::Error),

    #[error("address_key must not be empty")]
    EmptyAddressKey,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("{0} is {1} bytes, too long")]
    TooLong(&'static str, usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
