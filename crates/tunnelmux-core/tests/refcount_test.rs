//! Dedup/refcount behavior: repeat `create_tunnel` calls for the same
//! descriptor share one handle, and only the call that drops the refcount
//! to zero severs traffic.

mod support;

use std::time::Duration;

use tunnelmux_core::AddressFamily;

#[tokio::test]
async fn second_create_joins_first_and_shares_refcount() {
    let (local, peer) = support::manager_pair();

    let local_port = support::free_port(AddressFamily::Ipv4).await;
    let remote_port = support::free_port(AddressFamily::Ipv4).await;
    let echo = support::spawn_echo_server(AddressFamily::Ipv4, remote_port);

    let first = local
        .create_tunnel(local_port, remote_port, AddressFamily::Ipv4)
        .await
        .expect("first create should succeed");
    let second = local
        .create_tunnel(local_port, remote_port, AddressFamily::Ipv4)
        .await
        .expect("second create should join the first");

    assert_eq!(first, second);
    assert_eq!(first.id(), second.id());
    assert_eq!(first.refcount(), 2);

    // One close leaves the tunnel live: traffic still flows.
    first.close().await;
    assert_eq!(second.refcount(), 1);
    assert!(!second.is_closed());

    let mut client = support::connect_with_retry(AddressFamily::Ipv4, local_port).await;
    support::echo_roundtrip(&mut client, b"still alive").await;
    drop(client);

    // The second close drops refcount to zero and tears the tunnel down.
    second.close().await;
    assert!(second.is_closed());

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
    assert!(refused, "connects to a torn-down listener should eventually refuse");

    echo.abort();
    local.close().await;
    peer.close().await;
}

#[tokio::test]
async fn concurrent_creates_for_the_same_descriptor_coalesce() {
    let (local, peer) = support::manager_pair();

    let local_port = support::free_port(AddressFamily::Ipv4).await;
    let remote_port = support::free_port(AddressFamily::Ipv4).await;
    let echo = support::spawn_echo_server(AddressFamily::Ipv4, remote_port);

    let a = local.clone();
    let b = local.clone();
    let c = local.clone();
    let (r1, r2, r3) = tokio::join!(
        a.create_tunnel(local_port, remote_port, AddressFamily::Ipv4),
        b.create_tunnel(local_port, remote_port, AddressFamily::Ipv4),
        c.create_tunnel(local_port, remote_port, AddressFamily::Ipv4),
    );
    let t1 = r1.unwrap();
    let t2 = r2.unwrap();
    let t3 = r3.unwrap();

    assert_eq!(t1, t2);
    assert_eq!(t2, t3);
    assert_eq!(t1.refcount(), 3);

    echo.abort();
    local.close().await;
    peer.close().await;
}

#[tokio::test]
async fn extra_close_calls_are_a_harmless_no_op() {
    let (local, peer) = support::manager_pair();

    let local_port = support::free_port(AddressFamily::Ipv4).await;
    let remote_port = support::free_port(AddressFamily::Ipv4).await;
    let echo = support::spawn_echo_server(AddressFamily::Ipv4, remote_port);

    let tunnel = local
        .create_tunnel(local_port, remote_port, AddressFamily::Ipv4)
        .await
        .expect("create should succeed");

    tunnel.close().await;
    assert!(tunnel.is_closed());

    // Calling close() more times than the tunnel was referenced must not
    // panic, underflow the refcount, or attempt a second teardown.
    tunnel.close().await;
    tunnel.close().await;
    assert!(tunnel.is_closed());

    echo.abort();
    local.close().await;
    peer.close().await;
}
