//! altod — ALTO peer directory daemon.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{broadcast, mpsc};

use alto_core::config::AltoConfig;
use alto_services::{
    load_bootstrap, new_connection_table, Directory, JsonPeerFile, NoJournal, PeerJournal,
    WeightedCost,
};

use altod::{expiry, FatalError, Server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = AltoConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = AltoConfig::load().context("invalid configuration")?;
    tracing::info!(
        config = %AltoConfig::file_path().display(),
        "altod starting"
    );

    // Bootstrap state
    let bootstrap = load_bootstrap(&config.persistence).context("failed to load bootstrap state")?;
    let journal: Arc<dyn PeerJournal> = if config.persistence.write_through {
        Arc::new(JsonPeerFile::new(config.persistence.peers_path.clone()))
    } else {
        tracing::info!("peer table write-through disabled");
        Arc::new(NoJournal)
    };
    let directory = Directory::from_bootstrap(bootstrap, WeightedCost::shared(config.cost), journal)
        .context("peer table does not fit the topology")?
        .shared();
    let connections = new_connection_table();

    // ── Shutdown and fatal channels ──────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<FatalError>();

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let server = Server::bind(
        &config.network,
        directory.clone(),
        connections.clone(),
        fatal_tx,
        shutdown_tx.clone(),
    )
    .await?;
    tracing::info!(
        addr = %server.local_addr()?,
        max_connections = config.network.max_connections,
        "session server listening"
    );
    let mut server_task = tokio::spawn(server.run());

    let expiry_task = {
        let directory = directory.clone();
        let schedule = expiry::schedule(&config.registry);
        if let Some((ttl, _)) = schedule {
            tracing::info!(ttl_secs = ttl.as_secs(), "peer expiry enabled");
        }
        tokio::spawn(async move {
            match schedule {
                Some((ttl, every)) => expiry::expiry_loop(directory, ttl, every).await,
                None => std::future::pending().await,
            }
        })
    };

    // Status HTTP endpoint
    let api_port = config.network.api_port;
    if api_port != 0 {
        let state = alto_api::ApiState {
            directory: directory.clone(),
            connections: connections.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = alto_api::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    let outcome = tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            Ok(())
        }
        Some(e) = fatal_rx.recv() => {
            tracing::error!(error = %e, "directory invariant broken, shutting down");
            Err(anyhow!(e))
        }
        r = &mut server_task => {
            tracing::error!("session server exited: {:?}", r);
            return Err(anyhow!("session server exited"));
        }
        r = expiry_task => {
            tracing::error!("expiry task exited: {:?}", r);
            Err(anyhow!("expiry task exited"))
        }
    };

    let _ = shutdown_tx.send(());
    if let Err(e) = server_task.await {
        tracing::warn!(error = %e, "session server task failed");
    }
    if let Err(e) = directory.check_consistency().await {
        tracing::error!(error = %e, "directory inconsistent at shutdown");
    }
    outcome
}
