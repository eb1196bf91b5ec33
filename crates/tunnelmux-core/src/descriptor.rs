//! `TunnelDescriptor`, the identity a tunnel is deduplicated and
//! refcounted on.

use tunnelmux_proto::AddressFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelDescriptor {
    pub direction: Direction,
    pub local_port: u16,
    pub remote_port: u16,
    pub family: AddressFamily,
}

impl TunnelDescriptor {
    pub fn forward(local_port: u16, remote_port: u16, family: AddressFamily) -> Self {
        Self {
            direction: Direction::Forward,
            local_port,
            remote_port,
            family,
        }
    }

    pub fn reverse(local_port: u16, remote_port: u16, family: AddressFamily) -> Self {
        Self {
            direction: Direction::Reverse,
            local_port,
            remote_port,
            family,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_differing_only_by_direction_are_distinct_keys() {
        let fwd = TunnelDescriptor::forward(8080, 80, AddressFamily::Ipv4);
        let rev = TunnelDescriptor::reverse(8080, 80, AddressFamily::Ipv4);
        assert_ne!(fwd, rev);
    }
}
