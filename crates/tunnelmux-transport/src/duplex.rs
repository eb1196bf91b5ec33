//! An in-process pair of [`Transport`]s wired directly to each other.
//!
//! Generalizes the `MockTransport` pattern used elsewhere to unit-test
//! multiplexed connections into a first-class type: integration tests need
//! two live `TunnelManager`s actually talking to each other, not just a
//! transport that records what was sent.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// One end of an in-process duplex transport pair. See [`pair`].
pub struct DuplexTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Create two ends of an in-memory duplex channel, as if each were handed
/// the other end of a real carrier (WebSocket, pipe, whatever) by the host
/// application.
pub fn pair() -> (DuplexTransport, DuplexTransport) {
    let (tx_a_to_b, rx_a_to_b) = mpsc::unbounded_channel();
    let (tx_b_to_a, rx_b_to_a) = mpsc::unbounded_channel();

    let a = DuplexTransport {
        tx: Mutex::new(Some(tx_a_to_b)),
        rx: Mutex::new(rx_b_to_a),
    };
    let b = DuplexTransport {
        tx: Mutex::new(Some(tx_b_to_a)),
        rx: Mutex::new(rx_a_to_b),
    };
    (a, b)
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        let guard = self.tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(message).map_err(|e| {
                tracing::debug!(error = %e, "duplex transport send failed, peer end dropped");
                TransportError::SendFailed(e.to_string())
            }),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) {
        tracing::debug!("duplex transport end closing");
        // Dropping our sender lets the peer's `recv` observe end-of-stream
        // once it has drained whatever was already queued.
        self.tx.lock().await.take();
    }
}
