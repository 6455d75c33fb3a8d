//! ALTO integration test harness.
//!
//! Every test starts a real session server on 127.0.0.1:0 inside the test
//! runtime and talks the framed protocol to it over TCP. No external
//! setup is needed:
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use alto_core::config::NetworkConfig;
use alto_core::snapshot::TopologySnapshot;
use alto_core::wire::{frame_codec, Endpoint, Request, Response, MAX_FRAME_LENGTH};
use alto_services::{
    new_connection_table, ConnectionTable, Directory, SharedDirectory, TopologyStore,
    WeightedCost,
};
use altod::{FatalError, Server};

mod bootstrap;
mod concurrency;
mod protocol;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Three switches in a line, in the node-link layout the topology tooling
/// writes: X -(100, 10)- Y -(10, 50)- Z.
pub const XYZ_TOPOLOGY: &str = r#"{
    "directed": false,
    "multigraph": false,
    "graph": {},
    "nodes": [{"id": "X"}, {"id": "Y"}, {"id": "Z"}],
    "links": [
        {"source": "X", "target": "Y", "bw": 100, "delay": 10},
        {"source": "Y", "target": "Z", "bw": 10, "delay": 50}
    ]
}"#;

pub fn xyz_topology() -> TopologyStore {
    let snapshot = TopologySnapshot::from_json(XYZ_TOPOLOGY).expect("fixture parses");
    TopologyStore::from_snapshot(&snapshot).expect("fixture is valid")
}

pub fn xyz_directory() -> SharedDirectory {
    Directory::new(xyz_topology(), WeightedCost::shared(Default::default())).shared()
}

pub fn local_network() -> NetworkConfig {
    NetworkConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        ..NetworkConfig::default()
    }
}

pub fn register(key: &str, port: u16) -> Request {
    Request::Register {
        address_key: key.to_string(),
        endpoint: Endpoint::new("127.0.0.1", port),
    }
}

pub fn resolve(key: &str) -> Request {
    Request::Resolve {
        address_key: key.to_string(),
    }
}

pub fn unregister(key: &str) -> Request {
    Request::Unregister {
        address_key: key.to_string(),
    }
}

// ── Server harness ────────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    pub directory: SharedDirectory,
    pub connections: ConnectionTable,
    pub fatal: mpsc::UnboundedReceiver<FatalError>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(directory: SharedDirectory) -> Self {
        Self::start_with(directory, local_network()).await
    }

    pub async fn start_with(directory: SharedDirectory, network: NetworkConfig) -> Self {
        let connections = new_connection_table();
        let (shutdown, _) = broadcast::channel(1);
        let (fatal_tx, fatal) = mpsc::unbounded_channel();
        let server = Server::bind(
            &network,
            directory.clone(),
            connections.clone(),
            fatal_tx,
            shutdown.clone(),
        )
        .await
        .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        Self {
            addr,
            directory,
            connections,
            fatal,
            shutdown,
            task: tokio::spawn(server.run()),
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.addr).await.expect("connect")
    }

    /// Signal shutdown and wait for the accept loop to drain.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("server task panicked")?
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Minimal framed client.
pub struct Client {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect {addr}"))?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec(MAX_FRAME_LENGTH)),
        })
    }

    pub async fn send(&mut self, request: &Request) -> Result<()> {
        self.send_raw(request.encode()?).await
    }

    pub async fn send_raw(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        self.framed.send(payload.into()).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Response> {
        match tokio::time::timeout(Duration::from_secs(5), self.framed.next()).await {
            Err(_) => bail!("timed out waiting for a response"),
            Ok(None) => bail!("connection closed"),
            Ok(Some(frame)) => Ok(Response::decode(&frame?)?),
        }
    }

    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.recv().await
    }

    /// True once the server has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.framed.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        self.framed.get_mut()
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

pub fn peer_of(response: &Response) -> Option<&str> {
    match response {
        Response::Ok { peer: Some(peer) } => Some(peer.address_key.as_str()),
        _ => None,
    }
}

/// Poll until `f` is true or `attempts` × 20 ms have passed.
pub async fn eventually<F, Fut>(attempts: usize, mut f: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..attempts {
        if f().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
