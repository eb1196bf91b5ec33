//! The injected duplex transport collaborator.

pub mod duplex;
pub mod transport;

pub use duplex::{pair, DuplexTransport};
pub use transport::{Transport, TransportError};
