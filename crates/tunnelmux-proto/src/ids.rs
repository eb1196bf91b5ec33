//! Identifiers used on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identifies a tunnel for the lifetime of a manager.
///
/// Assigned by the requesting side and carried on every subsequent message
/// about that tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(pub u64);

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic, per-manager allocator for `TunnelId`s.
///
/// Ids only need to be unique within their own manager, but a tunnel id
/// travels verbatim on every message about that tunnel and is looked up in
/// the *peer's* registry too. Two independently-counting allocators
/// starting at 1 would collide the moment both peers originate a
/// tunnel in the same session, so each allocator is seeded with a random
/// 32-bit prefix (reusing `uuid`, already a dependency) and only the low 32
/// bits count up from there, so ids stay monotonically increasing within
/// one allocator while being effectively unique across the pair.
#[derive(Debug)]
pub struct TunnelIdAllocator {
    prefix: u64,
    next: AtomicU64,
}

impl Default for TunnelIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelIdAllocator {
    pub fn new() -> Self {
        let salt = Uuid::new_v4();
        let b = salt.as_bytes();
        let prefix = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64;
        Self {
            prefix: prefix << 32,
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> TunnelId {
        TunnelId(self.prefix | self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies a single end-to-end bytestream within a tunnel.
///
/// 128-bit random, so two managers picking ids independently for the same
/// tunnel essentially never collide on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
