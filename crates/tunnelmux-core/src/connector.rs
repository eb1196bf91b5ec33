//! The connect-on-demand side of a tunnel: on a peer-announced
//! `newConnection`, opens a fresh TCP connection to the configured loopback
//! port instead of accepting one.
//!
//! A manager plays this role for a tunnel's remote port on the side that
//! received `createProxy` (forward tunnels), and for a tunnel's local port
//! on the side that called `create_reverse_tunnel` (reverse tunnels).

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tunnelmux_proto::{AddressFamily, ConnectionId, Message, TunnelId};

use crate::connection::InboundFrame;
use crate::manager::ManagerInner;

/// `rx` is the receiving half of a connection-table slot the dispatch loop
/// already reserved for `connection_id` before spawning this task, so any
/// `data`/`end`/`close` that arrives while we're still connecting queues up
/// here instead of being dropped as unknown.
pub(crate) async fn handle_new_connection(
    manager: Arc<ManagerInner>,
    tunnel_id: TunnelId,
    connection_id: ConnectionId,
    port: u16,
    family: AddressFamily,
    rx: mpsc::Receiver<InboundFrame>,
) {
    let addr = format!("{}:{}", family.loopback_addr(), port);

    match TcpStream::connect(&addr).await {
        Ok(socket) => {
            tracing::info!(%tunnel_id, %connection_id, %addr, "connector opened local socket");
            manager.spawn_connection_pump(tunnel_id, connection_id, socket, rx);
        }
        Err(e) => {
            tracing::warn!(%tunnel_id, %connection_id, %addr, error = %e, "connector failed to reach local target");
            manager.unregister_connection(tunnel_id, connection_id).await;
            let _ = manager
                .send(Message::Close {
                    tunnel_id,
                    connection_id,
                })
                .await;
        }
    }
}
