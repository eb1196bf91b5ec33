//! Wire messages exchanged over the injected duplex transport.
//!
//! Messages are UTF-8 JSON objects with a `type` discriminator. Unknown
//! fields are ignored for forward compatibility; unknown `type` values are
//! handled by the caller, not rejected here (see `codec::decode`).

use crate::ids::{ConnectionId, TunnelId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "createProxy")]
    CreateProxy {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        #[serde(rename = "remotePort")]
        remote_port: u16,
        #[serde(rename = "useIPv4")]
        use_ipv4: bool,
    },

    #[serde(rename = "createReverseProxy")]
    CreateReverseProxy {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        #[serde(rename = "remotePort")]
        remote_port: u16,
    },

    #[serde(rename = "proxyCreated")]
    ProxyCreated {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
    },

    #[serde(rename = "proxyError")]
    ProxyError {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        error: serde_json::Value,
    },

    #[serde(rename = "newConnection")]
    NewConnection {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },

    #[serde(rename = "data")]
    Data {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
    },

    #[serde(rename = "end")]
    End {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },

    #[serde(rename = "close")]
    Close {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },

    #[serde(rename = "closeProxy")]
    CloseProxy {
        #[serde(rename = "tunnelId")]
        tunnel_id: TunnelId,
    },
}

impl Message {
    pub fn tunnel_id(&self) -> TunnelId {
        match self {
            Message::CreateProxy { tunnel_id, .. }
            | Message::CreateReverseProxy { tunnel_id, .. }
            | Message::ProxyCreated { tunnel_id }
            | Message::ProxyError { tunnel_id, .. }
            | Message::NewConnection { tunnel_id, .. }
            | Message::Data { tunnel_id, .. }
            | Message::End { tunnel_id, .. }
            | Message::Close { tunnel_id, .. }
            | Message::CloseProxy { tunnel_id } => *tunnel_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::CreateProxy { .. } => "createProxy",
            Message::CreateReverseProxy { .. } => "createReverseProxy",
            Message::ProxyCreated { .. } => "proxyCreated",
            Message::ProxyError { .. } => "proxyError",
            Message::NewConnection { .. } => "newConnection",
            Message::Data { .. } => "data",
            Message::End { .. } => "end",
            Message::Close { .. } => "close",
            Message::CloseProxy { .. } => "closeProxy",
        }
    }
}

/// Base64-encodes `data` payloads on the wire while keeping `Vec<u8>` in memory.
mod base64_payload {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        base64::engine::general_purpose::STANDARD
            .encode(bytes)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_payload_is_base64_on_the_wire() {
        let msg = Message::Data {
            tunnel_id: TunnelId(1),
            connection_id: ConnectionId::new(),
            payload: b"hello".to_vec(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"], serde_json::json!("aGVsbG8="));
    }

    #[test]
    fn create_proxy_uses_camel_case_fields() {
        let msg = Message::CreateProxy {
            tunnel_id: TunnelId(7),
            remote_port: 9000,
            use_ipv4: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "createProxy");
        assert_eq!(json["tunnelId"], 7);
        assert_eq!(json["remotePort"], 9000);
        assert_eq!(json["useIPv4"], false);
    }

    #[test]
    fn unknown_fields_are_ignored_for_forward_compat() {
        let raw = r#"{"type":"proxyCreated","tunnelId":3,"extra":"ignored"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, Message::ProxyCreated { tunnel_id: TunnelId(3) });
    }
}
