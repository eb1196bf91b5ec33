//! Shared helpers for the scenario tests: a free-port picker and a trivial
//! echo server, both bound on loopback so tests never touch a real network.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tunnelmux_core::{AddressFamily, TunnelManager};

/// Binds an ephemeral listener on `family`'s loopback address, reads back
/// the port the OS assigned, and drops the listener so the port is free
/// for a tunnel to bind a moment later.
///
/// Racy in the same way any "bind to find a free port" helper is, but the
/// teacher's own integration tests take the same shortcut rather than
/// maintaining a port allocator.
pub async fn free_port(family: AddressFamily) -> u16 {
    let addr = format!("{}:0", family.loopback_addr());
    let listener = TcpListener::bind(&addr).await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Spawns a listener on `family.loopback_addr():port` that echoes back
/// every byte it receives on each accepted connection, until the task is
/// aborted.
pub fn spawn_echo_server(family: AddressFamily, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", family.loopback_addr(), port);
        let listener = TcpListener::bind(&addr).await.unwrap();
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    })
}

/// A pair of `TunnelManager`s wired directly to each other over an
/// in-process [`DuplexTransport`], standing in for two real hosts talking
/// over whatever carrier the embedding application chose.
pub fn manager_pair() -> (TunnelManager, TunnelManager) {
    let (a, b) = tunnelmux_transport::pair();
    (TunnelManager::new(Arc::new(a)), TunnelManager::new(Arc::new(b)))
}

/// Connects to `family.loopback_addr():port`, retrying briefly since the
/// peer's listener (or the full proxy-created handshake) may not be ready
/// the instant `create_tunnel` returns in the reverse-tunnel case, where the
/// *peer* owns the listener we're dialing.
pub async fn connect_with_retry(family: AddressFamily, port: u16) -> TcpStream {
    let addr = format!("{}:{}", family.loopback_addr(), port);
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(&addr).await {
            return stream;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    TcpStream::connect(&addr).await.expect("target never became connectable")
}

pub async fn echo_roundtrip(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}
