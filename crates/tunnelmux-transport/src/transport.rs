//! The collaborator contract for the injected duplex message channel. The
//! real carrier (a WebSocket, a pipe, whatever the host process already
//! has) lives entirely outside this crate; this trait is the seam a
//! `TunnelManager` is generic over.

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A reliable, in-order, lossless duplex string-message carrier.
///
/// No heartbeats and no reconnection are modeled here; a `recv` that
/// returns `Ok(None)` means the carrier has ended for good.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one opaque message (a JSON-encoded [`tunnelmux_proto::Message`]
    /// in practice) to the peer.
    async fn send(&self, message: String) -> Result<(), TransportError>;

    /// Receive the next message, or `Ok(None)` once the carrier has closed.
    ///
    /// Implementations only need to support a single concurrent caller: the
    /// protocol engine's dispatch loop is the sole consumer.
    async fn recv(&self) -> Result<Option<String>, TransportError>;

    /// Best-effort notification that this side is done with the transport.
    /// Does not have to be called for `recv` to observe closure.
    async fn close(&self);
}
