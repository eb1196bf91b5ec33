//! Pumps bytes between one local TCP socket and the peer, for the lifetime
//! of a single end-to-end connection.
//!
//! Reads from the socket become outbound `data`/`end`/`close` messages;
//! frames arriving on `inbound_rx` (decoded from inbound `data`/`end`/`close`
//! messages by the protocol engine) are written to the socket's write half.
//! The two directions close independently, so a socket may half-close in
//! either order before the connection is fully torn down.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tunnelmux_proto::{ConnectionId, Message, TunnelId};

use crate::manager::ManagerInner;

/// A frame destined for a connection's local socket, decoded from an
/// inbound `data`/`end`/`close` wire message.
pub(crate) enum InboundFrame {
    Data(Vec<u8>),
    End,
    Close,
}

/// Runs until both directions of `socket` are drained or aborted, then
/// returns. The caller is responsible for unregistering the connection from
/// the manager's connection table afterward.
pub(crate) async fn run(
    manager: Arc<ManagerInner>,
    tunnel_id: TunnelId,
    connection_id: ConnectionId,
    socket: TcpStream,
    mut inbound_rx: mpsc::Receiver<InboundFrame>,
) {
    let (mut read_half, mut write_half) = socket.into_split();
    let mut read_buf = vec![0u8; manager.config().read_buffer_size];

    let mut outbound_done = false;
    let mut inbound_done = false;
    let mut sent_close = false;

    loop {
        if outbound_done && inbound_done {
            break;
        }

        tokio::select! {
            result = read_half.read(&mut read_buf), if !outbound_done => {
                match result {
                    Ok(0) => {
                        tracing::trace!(%tunnel_id, %connection_id, "local read half hit eof, sending end");
                        outbound_done = true;
                        let _ = manager.send(Message::End { tunnel_id, connection_id }).await;
                    }
                    Ok(n) => {
                        tracing::trace!(%tunnel_id, %connection_id, bytes = n, "pumping local read to data message");
                        let _ = manager
                            .send(Message::Data {
                                tunnel_id,
                                connection_id,
                                payload: read_buf[..n].to_vec(),
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::debug!(%tunnel_id, %connection_id, error = %e, "local socket read failed, closing connection");
                        outbound_done = true;
                        inbound_done = true;
                        if !sent_close {
                            sent_close = true;
                            let _ = manager.send(Message::Close { tunnel_id, connection_id }).await;
                        }
                    }
                }
            }
            frame = inbound_rx.recv(), if !inbound_done => {
                match frame {
                    Some(InboundFrame::Data(payload)) => {
                        if let Err(e) = write_half.write_all(&payload).await {
                            tracing::debug!(%tunnel_id, %connection_id, error = %e, "local socket write failed, closing connection");
                            outbound_done = true;
                            inbound_done = true;
                            if !sent_close {
                                sent_close = true;
                                let _ = manager.send(Message::Close { tunnel_id, connection_id }).await;
                            }
                        }
                    }
                    Some(InboundFrame::End) => {
                        tracing::trace!(%tunnel_id, %connection_id, "half-closing local write half");
                        let _ = write_half.shutdown().await;
                        inbound_done = true;
                    }
                    Some(InboundFrame::Close) | None => {
                        tracing::trace!(%tunnel_id, %connection_id, "tearing down connection on close/channel-drop");
                        inbound_done = true;
                        outbound_done = true;
                    }
                }
            }
        }
    }

    tracing::debug!(%tunnel_id, %connection_id, "connection pump finished");
}
