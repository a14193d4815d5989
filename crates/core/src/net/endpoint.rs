//! Address values shared by the group-socket, RTP interface, and SDP layers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// An IPv4/IPv6-agnostic network endpoint: address, port (host byte order
/// at rest; callers convert at the socket boundary), and an optional TTL
/// for multicast writes.
///
/// Equality compares family + address bytes only, not the port — two
/// endpoints naming the same host on different ports are equal, since
/// destination lookups key on the client's address alone.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
    pub ttl: Option<u8>,
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}
impl Eq for Endpoint {}

impl Endpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self {
            addr,
            port,
            ttl: None,
        }
    }

    pub fn with_ttl(addr: IpAddr, port: u16, ttl: u8) -> Self {
        Self {
            addr,
            port,
            ttl: Some(ttl),
        }
    }

    /// An endpoint is null iff its address bytes are all zero.
    pub fn is_null(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4 == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(v6) => v6 == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// An endpoint is multicast iff its address falls within the family's
    /// multicast range: IPv4 224.0.1.0–239.255.255.255 (224.0.0.0/24 is
    /// reserved for link-local protocols and excluded), or IPv6 `ff00::/8`.
    pub fn is_multicast(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                v4.is_multicast() && !(octets[0] == 224 && octets[1] == 0 && octets[2] == 0)
            }
            IpAddr::V6(v6) => v6.is_multicast(),
        }
    }

    pub fn to_socket_addr(self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.addr, self.port)
    }
}

/// `(group-address, source-filter-address, port, TTL)`.
///
/// An entry is source-specific multicast iff `source` is set to a
/// non-null address.
#[derive(Debug, Clone, Copy)]
pub struct GroupEndpointId {
    pub group: IpAddr,
    pub source: Option<IpAddr>,
    pub port: u16,
    pub ttl: u8,
}

impl GroupEndpointId {
    pub fn new(group: IpAddr, port: u16, ttl: u8) -> Self {
        Self {
            group,
            source: None,
            port,
            ttl,
        }
    }

    pub fn ssm(group: IpAddr, source: IpAddr, port: u16) -> Self {
        Self {
            group,
            source: Some(source),
            port,
            ttl: 1,
        }
    }

    pub fn is_ssm(&self) -> bool {
        self.source.is_some()
    }
}

/// Uniformly sample a source-specific-multicast group address in
/// 232.0.1.0 – 232.255.255.254, per the random-SSM-address picker
/// required before the socket can join a multicast group.
pub fn pick_random_ssm_address() -> Ipv4Addr {
    use rand::Rng;
    let mut rng = rand::rng();
    loop {
        let b2: u8 = rng.random();
        let b3: u8 = rng.random();
        if b2 == 0 && b3 == 0 {
            // Below 232.0.1.0 regardless of the last octet.
            continue;
        }
        let b4: u8 = rng.random_range(1..=254u16) as u8;
        return Ipv4Addr::new(232, b2, b3, b4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_port() {
        let a = Endpoint::new("10.0.0.1".parse().unwrap(), 1000);
        let b = Endpoint::new("10.0.0.1".parse().unwrap(), 2000);
        assert_eq!(a, b);
    }

    #[test]
    fn null_endpoint() {
        let e = Endpoint::new(Ipv4Addr::UNSPECIFIED.into(), 0);
        assert!(e.is_null());
    }

    #[test]
    fn multicast_excludes_reserved_block() {
        let reserved = Endpoint::new("224.0.0.251".parse().unwrap(), 5353);
        assert!(!reserved.is_multicast());
        let routable = Endpoint::new("224.0.1.1".parse().unwrap(), 5004);
        assert!(routable.is_multicast());
    }

    #[test]
    fn ipv6_link_local_multicast() {
        let e = Endpoint::new("ff02::1".parse().unwrap(), 5004);
        assert!(e.is_multicast());
    }

    #[test]
    fn ssm_group_endpoint() {
        let g = GroupEndpointId::ssm(
            "232.1.2.3".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            5004,
        );
        assert!(g.is_ssm());
    }

    #[test]
    fn random_ssm_address_in_range() {
        let mut saw_nonzero_second_octet = false;
        for _ in 0..100 {
            let addr = pick_random_ssm_address();
            let octets = addr.octets();
            assert_eq!(octets[0], 232);
            assert!(!(octets[1] == 0 && octets[2] == 0), "below 232.0.1.0");
            assert!(octets[3] >= 1 && octets[3] <= 254);
            if octets[1] != 0 {
                saw_nonzero_second_octet = true;
            }
        }
        assert!(
            saw_nonzero_second_octet,
            "second octet should vary across the full range, not stay fixed"
        );
    }
}
