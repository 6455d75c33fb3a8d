use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;

use alto_core::wire::{Request, Response};

use crate::*;

/// X, Y and Z register from their own connections; X is sent to its
/// one-hop neighbour, then to Z once Y leaves.
#[tokio::test]
async fn xyz_resolution_over_tcp() {
    let server = TestServer::start(xyz_directory()).await;
    let mut x = server.client().await;
    let mut y = server.client().await;
    let mut z = server.client().await;

    assert_eq!(x.call(&register("X", 9000)).await.unwrap(), Response::ok());
    assert_eq!(y.call(&register("Y", 9001)).await.unwrap(), Response::ok());
    assert_eq!(z.call(&register("Z", 9002)).await.unwrap(), Response::ok());

    match x.call(&resolve("X")).await.unwrap() {
        Response::Ok { peer: Some(peer) } => {
            assert_eq!(peer.address_key, "Y");
            assert_eq!(peer.endpoint.port, 9001);
            assert!(approx(peer.cost, 0.82), "cost {}", peer.cost);
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(y.call(&unregister("Y")).await.unwrap(), Response::ok());
    match x.call(&resolve("X")).await.unwrap() {
        Response::Ok { peer: Some(peer) } => {
            // Y's switch stays in the graph after Y leaves.
            assert_eq!(peer.address_key, "Z");
            assert!(approx(peer.cost, 3.32), "cost {}", peer.cost);
        }
        other => panic!("unexpected {other:?}"),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn lone_peer_lifecycle() {
    let server = TestServer::start(xyz_directory()).await;
    let mut c = server.client().await;

    assert_eq!(c.call(&register("A", 7000)).await.unwrap(), Response::ok());
    assert_eq!(c.call(&resolve("A")).await.unwrap(), Response::NoPeerFound);
    assert_eq!(c.call(&unregister("A")).await.unwrap(), Response::ok());
    assert_eq!(c.call(&resolve("A")).await.unwrap(), Response::NotRegistered);
    assert_eq!(c.call(&unregister("A")).await.unwrap(), Response::NotFound);

    server.directory.check_consistency().await.unwrap();
}

#[tokio::test]
async fn second_registration_conflicts() {
    let server = TestServer::start(xyz_directory()).await;
    let mut first = server.client().await;
    let mut second = server.client().await;

    assert_eq!(first.call(&register("X", 1)).await.unwrap(), Response::ok());
    assert_eq!(
        second.call(&register("X", 2)).await.unwrap(),
        Response::Conflict
    );
    assert_eq!(second.call(&register("Y", 2)).await.unwrap(), Response::ok());

    match second.call(&resolve("Y")).await.unwrap() {
        Response::Ok { peer: Some(peer) } => assert_eq!(peer.endpoint.port, 1),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn malformed_requests_do_not_close_the_session() {
    let server = TestServer::start(xyz_directory()).await;
    let mut c = server.client().await;

    c.send_raw(&b"garbage"[..]).await.unwrap();
    assert!(matches!(c.recv().await.unwrap(), Response::Malformed { .. }));
    c.send_raw(&br#"{"type":"register","address_key":"X","endpoint":{"host":"h","port":0}}"#[..])
        .await
        .unwrap();
    assert!(matches!(c.recv().await.unwrap(), Response::Malformed { .. }));

    assert_eq!(c.call(&register("X", 1)).await.unwrap(), Response::ok());
    assert!(!server.directory.snapshot().await.peers.is_empty());
}

#[tokio::test]
async fn pipelined_requests_keep_order() {
    let server = TestServer::start(xyz_directory()).await;
    let mut c = server.client().await;

    let requests = [
        register("X", 1),
        register("Y", 2),
        register("X", 3),
        resolve("X"),
        unregister("Y"),
        resolve("X"),
    ];
    for request in &requests {
        c.send(request).await.unwrap();
    }

    let mut responses = Vec::new();
    for _ in &requests {
        responses.push(c.recv().await.unwrap());
    }
    assert_eq!(responses[0], Response::ok());
    assert_eq!(responses[1], Response::ok());
    assert_eq!(responses[2], Response::Conflict);
    assert_eq!(peer_of(&responses[3]), Some("Y"));
    assert_eq!(responses[4], Response::ok());
    assert_eq!(responses[5], Response::NoPeerFound);
}

#[tokio::test]
async fn close_request_ends_the_session() {
    let server = TestServer::start(xyz_directory()).await;
    let mut c = server.client().await;

    assert_eq!(c.call(&Request::Close).await.unwrap(), Response::ok());
    assert!(c.is_closed().await);

    let connections = server.connections.clone();
    let drained = eventually(50, || {
        let connections = connections.clone();
        async move { connections.is_empty() }
    })
    .await;
    assert!(drained);
}

#[tokio::test]
async fn oversized_frame_closes_the_session() {
    let network = NetworkConfig {
        max_frame_length: 256,
        ..local_network()
    };
    let server = TestServer::start_with(xyz_directory(), network).await;
    let mut c = server.client().await;

    // Header only: the length alone is enough to reject the frame.
    let mut raw = BytesMut::new();
    raw.put_u32(10_000);
    c.stream_mut().write_all(&raw).await.unwrap();

    assert!(matches!(c.recv().await.unwrap(), Response::Malformed { .. }));
    assert!(c.is_closed().await);

    // The server keeps serving other clients.
    let mut other = server.client().await;
    assert_eq!(other.call(&register("X", 1)).await.unwrap(), Response::ok());
}

#[tokio::test]
async fn heartbeat_only_for_registered_peers() {
    let server = TestServer::start(xyz_directory()).await;
    let mut c = server.client().await;
    let heartbeat = Request::Heartbeat {
        address_key: "X".into(),
    };

    assert_eq!(c.call(&heartbeat).await.unwrap(), Response::NotFound);
    c.call(&register("X", 1)).await.unwrap();
    assert_eq!(c.call(&heartbeat).await.unwrap(), Response::ok());
}

#[tokio::test]
async fn shutdown_closes_idle_sessions() {
    let server = TestServer::start(xyz_directory()).await;
    let mut c = server.client().await;
    assert_eq!(c.call(&register("X", 1)).await.unwrap(), Response::ok());

    server.stop().await.unwrap();
    assert!(c.is_closed().await);
}
