//! The listener-owning side of a tunnel: accepts local TCP connections and
//! announces each one to the peer as `newConnection` so it can open the
//! matching end.
//!
//! A manager plays this role for a tunnel's local port on the side that
//! called `create_tunnel`, and for a tunnel's remote port on the side that
//! received `createReverseProxy`; the accept loop itself doesn't care
//! which.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tunnelmux_proto::{ConnectionId, Message, TunnelId};

use crate::manager::ManagerInner;

pub(crate) fn spawn_accept_loop(
    manager: Arc<ManagerInner>,
    tunnel_id: TunnelId,
    listener: TcpListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(%tunnel_id, error = %e, "accept failed, stopping proxy listener");
                    break;
                }
            };

            let connection_id = ConnectionId::new();
            tracing::info!(%tunnel_id, %connection_id, %peer_addr, "accepted connection on proxy listener");

            // Reserve the table slot before announcing the connection: the
            // peer can connect to its target and echo data back to us
            // before our own `send` below returns, and `forward_inbound`
            // must find a slot waiting rather than treat that data as
            // belonging to an unknown connection.
            let rx = manager.reserve_connection_slot(tunnel_id, connection_id).await;

            if manager
                .send(Message::NewConnection {
                    tunnel_id,
                    connection_id,
                })
                .await
                .is_err()
            {
                tracing::warn!(%tunnel_id, %connection_id, "failed to announce new connection, dropping socket");
                manager.unregister_connection(tunnel_id, connection_id).await;
                continue;
            }

            manager.clone().spawn_connection_pump(tunnel_id, connection_id, socket, rx);
        }
    })
}
