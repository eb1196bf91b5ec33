//! In-process configuration knobs for a [`crate::TunnelManager`].
//!
//! There is deliberately no CLI, env var, or file format here: a
//! `TunnelManager` is a library component embedded in a host process, and
//! the host already owns its own configuration story.

#[derive(Debug, Clone)]
pub struct TunnelManagerConfig {
    /// Capacity of the per-connection command queue that feeds bytes from
    /// the protocol engine into a connection's socket-writer half. Bounds
    /// how far a slow local socket can fall behind the inbound message
    /// stream before `send_message` backpressures the caller.
    pub data_channel_capacity: usize,

    /// Size of the read buffer used when pumping bytes from a local TCP
    /// socket into outgoing `data` messages.
    pub read_buffer_size: usize,
}

impl Default for TunnelManagerConfig {
    fn default() -> Self {
        Self {
            data_channel_capacity: 64,
            read_buffer_size: 16 * 1024,
        }
    }
}

impl TunnelManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_channel_capacity(mut self, capacity: usize) -> Self {
        self.data_channel_capacity = capacity;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}
