//! Binding a port already in use rejects with a stable `EADDRINUSE` code
//! and leaves no trace in the manager.

mod support;

use tunnelmux_core::{AddressFamily, TunnelError};

#[tokio::test]
async fn bind_in_use_rejects_with_addr_in_use() {
    let (local, peer) = support::manager_pair();

    let local_port = support::free_port(AddressFamily::Ipv6).await;
    let remote_port = support::free_port(AddressFamily::Ipv6).await;

    // Hold the port open with an unrelated listener first.
    let blocker = tokio::net::TcpListener::bind(("::", local_port)).await.unwrap();

    let err = local
        .create_tunnel(local_port, remote_port, AddressFamily::Ipv6)
        .await
        .expect_err("bind should fail while the port is already in use");

    match err {
        TunnelError::LocalBindFailure { code, message } => {
            assert_eq!(code, "EADDRINUSE");
            assert!(
                message.contains(&format!("listen EADDRINUSE :::{local_port}")),
                "unexpected message: {message}"
            );
        }
        other => panic!("expected LocalBindFailure, got {other:?}"),
    }

    drop(blocker);
    local.close().await;
    peer.close().await;
}
