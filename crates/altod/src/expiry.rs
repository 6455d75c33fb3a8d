//! Liveness sweep — unregisters peers that stopped sending heartbeats.

use std::time::Duration;

use alto_core::config::RegistryConfig;
use alto_services::SharedDirectory;

use crate::session::FatalError;

/// TTL and sweep period, or `None` when expiry is disabled.
pub fn schedule(config: &RegistryConfig) -> Option<(Duration, Duration)> {
    match config.peer_ttl_secs {
        0 => None,
        ttl => Some((
            Duration::from_secs(ttl),
            Duration::from_secs(config.expiry_interval_secs.max(1)),
        )),
    }
}

/// Sweep forever. Returns only if the directory diverged.
pub async fn expiry_loop(
    directory: SharedDirectory,
    ttl: Duration,
    every: Duration,
) -> Result<(), FatalError> {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let removed = directory.expire(ttl).await?;
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), peers = ?removed, "expired silent peers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alto_core::wire::Endpoint;
    use alto_services::{Directory, TopologyStore, WeightedCost};
    use std::sync::Arc;

    #[test]
    fn zero_ttl_disables_expiry() {
        assert_eq!(schedule(&RegistryConfig::default()), None);
        let config = RegistryConfig {
            peer_ttl_secs: 30,
            expiry_interval_secs: 0,
        };
        assert_eq!(
            schedule(&config),
            Some((Duration::from_secs(30), Duration::from_secs(1)))
        );
    }

    #[tokio::test]
    async fn silent_peers_are_swept() {
        let directory = Arc::new(Directory::new(
            TopologyStore::new(),
            WeightedCost::shared(Default::default()),
        ));
        directory
            .register("quiet", Endpoint::new("10.0.0.1", 1))
            .await
            .unwrap();

        let task = tokio::spawn(expiry_loop(
            directory.clone(),
            Duration::ZERO,
            Duration::from_millis(10),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!directory.is_registered("quiet").await);
        directory.check_consistency().await.unwrap();
        task.abort();
    }
}
