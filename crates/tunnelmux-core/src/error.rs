//! `TunnelError` is the single error surface the public API returns. Every
//! failure path funnels into one of these variants rather than leaking
//! `std::io::Error` or raw transport errors to callers.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    /// The manager was closed, either before this call started or while it
    /// was in flight.
    #[error("tunnel manager is closed")]
    ManagerClosed,

    /// A local `bind` failed. `code` is a platform-independent string such
    /// as `EADDRINUSE`, derived from the OS error kind rather than the raw
    /// (platform-specific) errno.
    #[error("{message}")]
    LocalBindFailure { code: String, message: String },

    /// The peer reported a bind/setup failure for a proxy we asked it to
    /// create. The payload is whatever it put in `proxyError.error`.
    #[error("remote proxy setup failed: {0}")]
    RemoteBindFailure(serde_json::Value),

    /// The transport ended while this call was waiting on a reply.
    #[error("transport closed")]
    TransportClosed,

    /// The peer sent a message that could not be interpreted: malformed
    /// JSON, an unknown message type, or a reference to a tunnel/connection
    /// id this manager has no record of.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Maps a failed `bind`/`listen` into the wire-stable error shape used by
/// both `LocalBindFailure` and the JSON payload of an outgoing `proxyError`.
pub(crate) fn bind_error_code(kind: std::io::ErrorKind) -> &'static str {
    match kind {
        std::io::ErrorKind::AddrInUse => "EADDRINUSE",
        std::io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        std::io::ErrorKind::PermissionDenied => "EACCES",
        _ => "EUNKNOWN",
    }
}

pub(crate) fn local_bind_failure(
    err: &std::io::Error,
    wildcard_addr: &str,
    port: u16,
) -> TunnelError {
    let code = bind_error_code(err.kind());
    TunnelError::LocalBindFailure {
        code: code.to_string(),
        message: format!("listen {code} {wildcard_addr}:{port}"),
    }
}

/// Renders a [`TunnelError`] as the JSON value carried in a `proxyError`
/// message's `error` field, so the code survives the hop to the peer.
pub(crate) fn error_to_wire(err: &TunnelError) -> serde_json::Value {
    match err {
        TunnelError::LocalBindFailure { code, message } => {
            serde_json::json!({ "code": code, "message": message })
        }
        other => serde_json::json!({ "code": "EUNKNOWN", "message": other.to_string() }),
    }
}
