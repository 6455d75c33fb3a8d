//! Session handler — one framed request/response loop per connection.
//!
//! Every frame gets exactly one response frame. The directory operation
//! completes before the response is written, so a connection that drops
//! mid-request never leaves a half-applied mutation behind.
//!
//! Reads and writes use separate codecs: `max_frame_length` bounds requests,
//! responses are bounded by `MAX_RESPONSE_LENGTH`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use alto_core::config::NetworkConfig;
use alto_core::wire::{frame_codec, response_codec, Request, Response};
use alto_services::{ConnectionTable, Directory, DirectoryError, ResolveError, SharedDirectory};

/// Per-session limits, taken from `[network]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// `None` = never time out.
    pub idle_timeout: Option<Duration>,
    pub max_consecutive_malformed: u32,
    pub max_frame_length: usize,
}

impl SessionLimits {
    pub fn from_config(network: &NetworkConfig) -> Self {
        Self {
            idle_timeout: match network.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_consecutive_malformed: network.max_consecutive_malformed.max(1),
            max_frame_length: network.max_frame_length,
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    CloseRequested,
    IdleTimeout,
    TooManyMalformed,
    FramingError,
    WriteFailed,
    Shutdown,
}

/// The directory's invariants no longer hold. The daemon must stop.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

pub struct Session<S> {
    id: u64,
    reader: FramedRead<ReadHalf<S>, LengthDelimitedCodec>,
    writer: FramedWrite<WriteHalf<S>, LengthDelimitedCodec>,
    directory: SharedDirectory,
    connections: ConnectionTable,
    limits: SessionLimits,
    shutdown: broadcast::Receiver<()>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: u64,
        stream: S,
        directory: SharedDirectory,
        connections: ConnectionTable,
        limits: SessionLimits,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            id,
            reader: FramedRead::new(read, frame_codec(limits.max_frame_length)),
            writer: FramedWrite::new(write, response_codec()),
            directory,
            connections,
            limits,
            shutdown,
        }
    }

    /// Serve requests until the session ends.
    ///
    /// Only a broken directory invariant is an error; every other way a
    /// session can end is reported as a `SessionEnd`.
    pub async fn run(mut self) -> Result<SessionEnd, FatalError> {
        let mut malformed_run = 0u32;

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.recv() => return Ok(SessionEnd::Shutdown),
                _ = idle(self.limits.idle_timeout) => {
                    tracing::debug!(conn = self.id, "idle timeout");
                    return Ok(SessionEnd::IdleTimeout);
                }
                frame = self.reader.next() => frame,
            };

            let frame = match frame {
                None => return Ok(SessionEnd::PeerClosed),
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    // Oversized or truncated frame: the stream position is lost.
                    tracing::warn!(conn = self.id, error = %e, "unrecoverable framing error");
                    self.send(&Response::malformed(e.to_string())).await;
                    return Ok(SessionEnd::FramingError);
                }
            };
            self.record_request();

            let request = match Request::decode(&frame) {
                Ok(request) => {
                    malformed_run = 0;
                    request
                }
                Err(e) => {
                    malformed_run += 1;
                    tracing::warn!(conn = self.id, error = %e, malformed_run, "malformed request");
                    if !self.send(&Response::malformed(e.to_string())).await {
                        return Ok(SessionEnd::WriteFailed);
                    }
                    if malformed_run >= self.limits.max_consecutive_malformed {
                        return Ok(SessionEnd::TooManyMalformed);
                    }
                    continue;
                }
            };

            let closing = matches!(request, Request::Close);
            let response = dispatch(&self.directory, &request).await?;
            tracing::debug!(
                conn = self.id,
                kind = request.kind(),
                status = response.status(),
                "request served"
            );
            if !self.send(&response).await {
                return Ok(SessionEnd::WriteFailed);
            }
            if closing {
                return Ok(SessionEnd::CloseRequested);
            }
        }
    }

    async fn send(&mut self, response: &Response) -> bool {
        let bytes = match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(conn = self.id, error = %e, "failed to encode response");
                return false;
            }
        };
        match self.writer.send(bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn = self.id, error = %e, "response write failed");
                false
            }
        }
    }

    fn record_request(&self) {
        if let Some(meta) = self.connections.get(&self.id) {
            meta.record_request();
        }
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

/// Run one request against the directory and map the outcome to a response.
pub async fn dispatch(directory: &Directory, request: &Request) -> Result<Response, FatalError> {
    let response = match request {
        Request::Register {
            address_key,
            endpoint,
        } => mutation(directory.register(address_key, endpoint.clone()).await)?,
        Request::Unregister { address_key } => {
            mutation(directory.unregister(address_key).await.map(|_| ()))?
        }
        Request::Heartbeat { address_key } => mutation(directory.heartbeat(address_key).await)?,
        Request::Resolve { address_key } => match directory.resolve(address_key).await {
            Ok(candidate) => Response::resolved(candidate.into()),
            Err(ResolveError::NotRegistered(_)) => Response::NotRegistered,
            Err(ResolveError::NoPeerFound(_)) => Response::NoPeerFound,
            Err(e @ ResolveError::Inconsistent(_)) => {
                tracing::error!(error = %e, "resolve found a diverged directory");
                return Err(e.into());
            }
        },
        Request::Close => Response::ok(),
    };
    Ok(response)
}

fn mutation(result: Result<(), DirectoryError>) -> Result<Response, FatalError> {
    match result {
        Ok(()) => Ok(Response::ok()),
        Err(DirectoryError::Conflict(_)) => Ok(Response::Conflict),
        Err(DirectoryError::NotFound(_)) => Ok(Response::NotFound),
        Err(e @ DirectoryError::Diverged(_)) => {
            tracing::error!(error = %e, "directory mutation diverged");
            Err(e.into())
        }
    }
}
