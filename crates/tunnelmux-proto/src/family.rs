//! Address family handling for the local/remote TCP surface.

use serde::{Deserialize, Serialize};

/// Which IP family a tunnel's sockets are bound/connected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// `useIPv4` as carried on the wire by `createProxy`.
    pub fn from_use_ipv4(use_ipv4: bool) -> Self {
        if use_ipv4 {
            AddressFamily::Ipv4
        } else {
            AddressFamily::Ipv6
        }
    }

    pub fn use_ipv4(self) -> bool {
        matches!(self, AddressFamily::Ipv4)
    }

    /// Wildcard bind address for a local listener of this family.
    pub fn wildcard_addr(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "0.0.0.0",
            AddressFamily::Ipv6 => "::",
        }
    }

    /// Loopback address used for reverse-tunnel connects.
    pub fn loopback_addr(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "127.0.0.1",
            AddressFamily::Ipv6 => "::1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_loopback_match_family() {
        assert_eq!(AddressFamily::Ipv4.wildcard_addr(), "0.0.0.0");
        assert_eq!(AddressFamily::Ipv6.wildcard_addr(), "::");
        assert_eq!(AddressFamily::Ipv4.loopback_addr(), "127.0.0.1");
        assert_eq!(AddressFamily::Ipv6.loopback_addr(), "::1");
    }

    #[test]
    fn round_trips_through_use_ipv4() {
        assert_eq!(
            AddressFamily::from_use_ipv4(AddressFamily::Ipv4.use_ipv4()),
            AddressFamily::Ipv4
        );
        assert_eq!(
            AddressFamily::from_use_ipv4(AddressFamily::Ipv6.use_ipv4()),
            AddressFamily::Ipv6
        );
    }
}
