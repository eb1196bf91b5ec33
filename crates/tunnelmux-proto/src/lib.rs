//! Wire protocol for the tunnel multiplexer.
//!
//! Defines the JSON messages exchanged between two `TunnelManager`s over a
//! single injected duplex transport, plus the identifiers and address-family
//! helpers those messages carry.

pub mod codec;
pub mod family;
pub mod ids;
pub mod message;

pub use codec::{decode, encode, CodecError};
pub use family::AddressFamily;
pub use ids::{ConnectionId, TunnelId, TunnelIdAllocator};
pub use message::Message;
