//! TCP accept loop with an admission limit.
//!
//! A permit is taken before `accept`, so once `max_connections` sessions
//! are open new clients wait in the kernel backlog instead of spawning
//! unbounded tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};

use alto_core::config::NetworkConfig;
use alto_services::{ConnectionMeta, ConnectionTable, SharedDirectory};

use crate::session::{FatalError, Session, SessionLimits};

/// How long shutdown waits for open sessions to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Server {
    listener: TcpListener,
    directory: SharedDirectory,
    connections: ConnectionTable,
    limits: SessionLimits,
    max_connections: usize,
    admission: Arc<Semaphore>,
    fatal: mpsc::UnboundedSender<FatalError>,
    shutdown: broadcast::Sender<()>,
}

impl Server {
    pub async fn bind(
        network: &NetworkConfig,
        directory: SharedDirectory,
        connections: ConnectionTable,
        fatal: mpsc::UnboundedSender<FatalError>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", network.bind_addr, network.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let max_connections = network.max_connections.max(1);
        Ok(Self {
            listener,
            directory,
            connections,
            limits: SessionLimits::from_config(network),
            max_connections,
            admission: Arc::new(Semaphore::new(max_connections)),
            fatal,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    pub async fn run(self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut next_id = 0u64;

        loop {
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = self.admission.clone().acquire_owned() => permit?,
            };

            let (stream, remote) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "set_nodelay failed");
            }

            next_id += 1;
            let id = next_id;
            self.connections.insert(id, ConnectionMeta::new(remote));
            tracing::debug!(conn = id, remote = %remote, "connection opened");

            let session = Session::new(
                id,
                stream,
                self.directory.clone(),
                self.connections.clone(),
                self.limits,
                self.shutdown.subscribe(),
            );
            let connections = self.connections.clone();
            let fatal = self.fatal.clone();
            tokio::spawn(async move {
                match session.run().await {
                    Ok(end) => tracing::debug!(conn = id, ?end, "connection closed"),
                    Err(e) => {
                        tracing::error!(conn = id, error = %e, "session hit a fatal error");
                        let _ = fatal.send(e);
                    }
                }
                connections.remove(&id);
                drop(permit);
            });
        }

        tracing::info!(open = self.connections.len(), "session server shutting down");
        let all = u32::try_from(self.max_connections).unwrap_or(u32::MAX);
        if tokio::time::timeout(SHUTDOWN_GRACE, self.admission.acquire_many(all))
            .await
            .is_err()
        {
            tracing::warn!(open = self.connections.len(), "sessions still open after grace period");
        }
        Ok(())
    }
}
