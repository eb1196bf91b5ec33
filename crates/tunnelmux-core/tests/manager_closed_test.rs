//! Once a manager is closed, every create call rejects and previously
//! bound local ports stop accepting.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tunnelmux_core::{AddressFamily, TunnelError, TunnelManager};

#[tokio::test]
async fn close_rejects_new_creates_and_stops_existing_listeners() {
    let (local, peer) = support::manager_pair();

    let local_port = support::free_port(AddressFamily::Ipv4).await;
    let remote_port = support::free_port(AddressFamily::Ipv4).await;
    let echo = support::spawn_echo_server(AddressFamily::Ipv4, remote_port);

    let _tunnel = local
        .create_tunnel(local_port, remote_port, AddressFamily::Ipv4)
        .await
        .expect("create should succeed before close");

    local.close().await;
    assert!(local.is_closed());

    let err = local
        .create_tunnel(local_port, remote_port, AddressFamily::Ipv4)
        .await
        .expect_err("create_tunnel after close must reject");
    assert!(matches!(err, TunnelError::ManagerClosed));

    let err = local
        .create_reverse_tunnel(local_port, remote_port)
        .await
        .expect_err("create_reverse_tunnel after close must reject");
    assert!(matches!(err, TunnelError::ManagerClosed));

    let mut refused = false;
    for _ in 0..20 {
        if tokio::net::TcpStream::connect(("127.0.0.1", local_port))
            .await
            .is_err()
        {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused, "listener should stop accepting once the manager is closed");

    echo.abort();
    peer.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let (local, peer) = support::manager_pair();
    local.close().await;
    local.close().await;
    assert!(local.is_closed());
    peer.close().await;
}

#[tokio::test]
async fn closing_the_manager_rejects_an_in_flight_create() {
    // `peer_end` is never wrapped in a manager and nothing ever reads it, so
    // `createProxy` is sent but `proxyCreated` never arrives; closing the
    // local manager must still resolve the pending call rather than hang.
    let (local_end, _peer_end) = tunnelmux_transport::pair();
    let local = TunnelManager::new(Arc::new(local_end));

    let local_port = support::free_port(AddressFamily::Ipv4).await;
    let remote_port = support::free_port(AddressFamily::Ipv4).await;

    let local_for_create = local.clone();
    let create = tokio::spawn(async move {
        local_for_create
            .create_tunnel(local_port, remote_port, AddressFamily::Ipv4)
            .await
    });

    // Give the bind + send a moment to land before we close underneath it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    local.close().await;

    let result = create.await.unwrap();
    assert!(matches!(result, Err(TunnelError::ManagerClosed)));
}
