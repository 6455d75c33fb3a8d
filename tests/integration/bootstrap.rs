use std::path::PathBuf;
use std::sync::Arc;

use alto_core::config::PersistenceConfig;
use alto_core::snapshot::PeerTable;
use alto_core::wire::Response;
use alto_services::{load_bootstrap, Directory, JsonPeerFile, WeightedCost};

use crate::*;

fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("alto-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start_from(persistence: &PersistenceConfig) -> SharedDirectory {
    let bootstrap = load_bootstrap(persistence).unwrap();
    Directory::from_bootstrap(
        bootstrap,
        WeightedCost::shared(Default::default()),
        Arc::new(JsonPeerFile::new(persistence.peers_path.clone())),
    )
    .unwrap()
    .shared()
}

/// Registrations written through to the peer table survive a restart.
#[tokio::test]
async fn peer_table_survives_restart() {
    let dir = scratch("restart");
    let persistence = PersistenceConfig {
        topology_path: dir.join("topology.json"),
        peers_path: dir.join("peers.json"),
        write_through: true,
    };
    std::fs::write(&persistence.topology_path, XYZ_TOPOLOGY).unwrap();

    let server = TestServer::start(start_from(&persistence)).await;
    let mut c = server.client().await;
    for (key, port) in [("X", 9000), ("Y", 9001), ("Z", 9002)] {
        assert_eq!(c.call(&register(key, port)).await.unwrap(), Response::ok());
    }
    assert_eq!(c.call(&unregister("Z")).await.unwrap(), Response::ok());
    drop(c);
    server.stop().await.unwrap();

    let table = PeerTable::read(&persistence.peers_path).unwrap().unwrap();
    assert_eq!(table.peers.keys().collect::<Vec<_>>(), vec!["X", "Y"]);

    let restarted = TestServer::start(start_from(&persistence)).await;
    let mut c = restarted.client().await;
    assert_eq!(peer_of(&c.call(&resolve("X")).await.unwrap()), Some("Y"));
    assert_eq!(c.call(&register("X", 1)).await.unwrap(), Response::Conflict);
    restarted.directory.check_consistency().await.unwrap();

    let _ = std::fs::remove_dir_all(&dir);
}

/// A `{ip: port}` table from older deployments seeds the registry with
/// the address key doubling as host.
#[tokio::test]
async fn bare_port_peer_table_is_accepted() {
    let dir = scratch("legacy");
    let persistence = PersistenceConfig {
        topology_path: dir.join("topology.json"),
        peers_path: dir.join("peers.json"),
        write_through: true,
    };
    std::fs::write(&persistence.topology_path, XYZ_TOPOLOGY).unwrap();
    std::fs::write(&persistence.peers_path, r#"{"X": 5001, "Y": 5002}"#).unwrap();

    let server = TestServer::start(start_from(&persistence)).await;
    let mut c = server.client().await;
    match c.call(&resolve("X")).await.unwrap() {
        Response::Ok { peer: Some(peer) } => {
            assert_eq!(peer.address_key, "Y");
            assert_eq!(peer.endpoint.host, "Y");
            assert_eq!(peer.endpoint.port, 5002);
        }
        other => panic!("unexpected {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn missing_topology_starts_empty() {
    let dir = scratch("empty");
    let persistence = PersistenceConfig {
        topology_path: dir.join("missing.json"),
        peers_path: dir.join("peers.json"),
        write_through: false,
    };

    let server = TestServer::start(start_from(&persistence)).await;
    let mut c = server.client().await;
    c.call(&register("a", 1)).await.unwrap();
    c.call(&register("b", 2)).await.unwrap();
    assert_eq!(c.call(&resolve("a")).await.unwrap(), Response::NoPeerFound);

    let _ = std::fs::remove_dir_all(&dir);
}
