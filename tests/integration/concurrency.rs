use std::time::Duration;

use alto_core::wire::Response;

use crate::*;

/// Many clients churn the same keys while others resolve. Afterwards the
/// registry and the topology must still agree.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_clients_leave_a_consistent_directory() {
    let server = TestServer::start(xyz_directory()).await;
    let keys = ["X", "Y", "Z", "laptop-1", "laptop-2"];

    let mut tasks = Vec::new();
    for worker in 0..12usize {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut c = Client::connect(addr).await.unwrap();
            for round in 0..60usize {
                let key = keys[(worker + round) % keys.len()];
                let request = match (worker + round) % 3 {
                    0 => register(key, 10_000 + worker as u16),
                    1 => unregister(key),
                    _ => resolve(key),
                };
                if let Response::Malformed { reason } = c.call(&request).await.unwrap() {
                    panic!("malformed: {reason}");
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    server.directory.check_consistency().await.unwrap();
    let mut fatal = server.fatal;
    assert!(fatal.try_recv().is_err());
}

/// Exactly one of many simultaneous registrations of one key succeeds.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_registrations_have_one_winner() {
    let server = TestServer::start(xyz_directory()).await;

    let mut tasks = Vec::new();
    for port in 1..=20u16 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut c = Client::connect(addr).await.unwrap();
            c.call(&register("Y", port)).await.unwrap()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Response::Ok { .. } => winners += 1,
            Response::Conflict => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(server.directory.snapshot().await.peers.len(), 1);
}

/// With one admission permit, a second client is not served until the
/// first disconnects.
#[tokio::test]
async fn admission_limit_queues_extra_clients() {
    let network = NetworkConfig {
        max_connections: 1,
        ..local_network()
    };
    let server = TestServer::start_with(xyz_directory(), network).await;

    let mut first = server.client().await;
    assert_eq!(first.call(&register("X", 1)).await.unwrap(), Response::ok());

    let mut second = server.client().await;
    second.send(&register("Y", 2)).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(300), second.recv()).await;
    assert!(waited.is_err(), "second client served while first was open");
    assert_eq!(server.connections.len(), 1);

    drop(first);
    assert_eq!(second.recv().await.unwrap(), Response::ok());
    assert!(server.directory.is_registered("Y").await);
}
