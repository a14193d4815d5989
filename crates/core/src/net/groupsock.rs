//! Group socket: a UDP fd plus optional multicast membership and a
//! destination list keyed by session id.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
use crate::net::endpoint::{Endpoint, GroupEndpointId};
use crate::net::socket;

/// Process-wide traffic counters, aggregated across every group socket.
static STATS_INCOMING: AtomicU64 = AtomicU64::new(0);
static STATS_OUTGOING: AtomicU64 = AtomicU64::new(0);

pub fn stats_incoming() -> u64 {
    STATS_INCOMING.load(Ordering::Relaxed)
}
pub fn stats_outgoing() -> u64 {
    STATS_OUTGOING.load(Ordering::Relaxed)
}

/// A destination record: `(GroupEndpointId, session_id)`.
#[derive(Debug, Clone)]
struct Destination {
    endpoint: GroupEndpointId,
    session_id: u32,
}

/// A UDP socket associated with an optional multicast group and a set of
/// destinations keyed by session id.
///
/// Invariant: for a given `(socket, session_id)` at most one destination
/// record exists; `add_destination` is idempotent on
/// `(address, port, session_id)`.
pub struct GroupSocket {
    socket: UdpSocket,
    group: Option<IpAddr>,
    iface: IpAddr,
    destinations: RwLock<Vec<Destination>>,
    last_ttl: RwLock<Option<u8>>,
    incoming_count: AtomicU64,
    outgoing_count: AtomicU64,
}

impl GroupSocket {
    /// Any-source multicast join: binds `port`, joins `group`, and installs
    /// a default destination `(group, port, ttl, session_id=0)`.
    pub fn new_ism(iface: IpAddr, group: IpAddr, port: u16, ttl: u8) -> Result<Self> {
        let bind_addr = SocketAddr::new(if group.is_ipv4() {
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }, port);
        let udp = socket::setup_datagram(bind_addr, socket::ReuseScope::Reuse)?;
        socket::join_multicast(&udp, group, iface)?;
        socket::set_multicast_ttl(&udp, ttl)?;

        let gs = Self {
            socket: udp,
            group: Some(group),
            iface,
            destinations: RwLock::new(Vec::new()),
            last_ttl: RwLock::new(Some(ttl)),
            incoming_count: AtomicU64::new(0),
            outgoing_count: AtomicU64::new(0),
        };
        gs.add_destination(GroupEndpointId::new(group, port, ttl), 0);
        Ok(gs)
    }

    /// Source-specific-multicast join; falls back to any-source multicast
    /// on failure.
    pub fn new_ssm(iface: IpAddr, group: IpAddr, source: IpAddr, port: u16) -> Result<Self> {
        let bind_addr = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port);
        let udp = socket::setup_datagram(bind_addr, socket::ReuseScope::Reuse)?;

        if socket::join_ssm(&udp, group, source).is_err() {
            tracing::warn!(%group, %source, "SSM join failed, falling back to ISM");
            socket::join_multicast(&udp, group, iface)?;
        }

        let gs = Self {
            socket: udp,
            group: Some(group),
            iface,
            destinations: RwLock::new(Vec::new()),
            last_ttl: RwLock::new(None),
            incoming_count: AtomicU64::new(0),
            outgoing_count: AtomicU64::new(0),
        };
        gs.add_destination(GroupEndpointId::ssm(group, source, port), 0);
        Ok(gs)
    }

    /// Bind a plain unicast-only group socket (no multicast membership).
    pub fn new_unicast(bind_addr: SocketAddr) -> Result<Self> {
        let udp = socket::setup_datagram(bind_addr, socket::ReuseScope::Reuse)?;
        Ok(Self {
            socket: udp,
            group: None,
            iface: bind_addr.ip(),
            destinations: RwLock::new(Vec::new()),
            last_ttl: RwLock::new(None),
            incoming_count: AtomicU64::new(0),
            outgoing_count: AtomicU64::new(0),
        })
    }

    pub fn local_port(&self) -> u16 {
        socket::get_source_port(&self.socket).unwrap_or(0)
    }

    pub fn has_multiple_destinations(&self) -> bool {
        self.destinations.read().len() > 1
    }

    /// Insert or replace the destination for `session_id`. Idempotent on
    /// `(address, port, session_id)` per Open Question (a): a duplicate add
    /// is silently ignored even though the constructor's default record
    /// (session_id 0) may alias a later explicit addition to the same
    /// identity tuple.
    pub fn add_destination(&self, endpoint: GroupEndpointId, session_id: u32) {
        let mut dests = self.destinations.write();
        let already_present = dests.iter().any(|d| {
            d.session_id == session_id
                && d.endpoint.group == endpoint.group
                && d.endpoint.port == endpoint.port
        });
        if already_present {
            return;
        }
        dests.retain(|d| d.session_id != session_id);
        dests.push(Destination {
            endpoint,
            session_id,
        });
    }

    pub fn remove_destination(&self, session_id: u32) {
        self.destinations
            .write()
            .retain(|d| d.session_id != session_id);
    }

    pub fn remove_all_destinations(&self) {
        self.destinations.write().clear();
    }

    /// Change the destination's address/port/ttl for `session_id`. If the
    /// new address is multicast and differs from the currently joined
    /// group, leaves the old group and joins the new one.
    pub fn change_destination_parameters(
        &self,
        addr: Option<IpAddr>,
        port: Option<u16>,
        ttl: Option<u8>,
        session_id: u32,
    ) -> Result<()> {
        let mut dests = self.destinations.write();
        let existing = dests.iter().position(|d| d.session_id == session_id);

        let mut endpoint = match existing {
            Some(i) => dests[i].endpoint,
            None => GroupEndpointId::new(
                addr.unwrap_or(self.iface),
                port.unwrap_or(0),
                ttl.unwrap_or(1),
            ),
        };

        if let Some(a) = addr {
            if Some(a) != self.group && Endpoint::new(a, 0).is_multicast() {
                if let Some(old_group) = self.group {
                    let _ = socket::leave_multicast(&self.socket, old_group, self.iface);
                }
                socket::join_multicast(&self.socket, a, self.iface)?;
            }
            endpoint.group = a;
        }
        if let Some(p) = port {
            endpoint.port = p;
        }
        if let Some(t) = ttl {
            endpoint.ttl = t;
        }

        dests.retain(|d| d.session_id != session_id);
        dests.push(Destination {
            endpoint,
            session_id,
        });
        Ok(())
    }

    /// Write `buf` to every destination. Stops and returns an error on the
    /// first short write.
    pub fn output(&self, buf: &[u8]) -> Result<()> {
        let dests = self.destinations.read();
        for dest in dests.iter() {
            let mut last_ttl = self.last_ttl.write();
            if dest.endpoint.group.is_ipv4() && *last_ttl != Some(dest.endpoint.ttl) {
                socket::set_multicast_ttl(&self.socket, dest.endpoint.ttl)?;
                *last_ttl = Some(dest.endpoint.ttl);
            }
            drop(last_ttl);

            let addr = SocketAddr::new(dest.endpoint.group, dest.endpoint.port);
            let n = self.socket.send_to(buf, addr)?;
            if n != buf.len() {
                return Err(RtspError::ShortWrite {
                    wrote: n,
                    wanted: buf.len(),
                });
            }
            self.outgoing_count.fetch_add(1, Ordering::Relaxed);
            STATS_OUTGOING.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Write to the destination registered for a specific session id only.
    pub fn output_to_session(&self, buf: &[u8], session_id: u32) -> Result<()> {
        let dests = self.destinations.read();
        let dest = dests
            .iter()
            .find(|d| d.session_id == session_id)
            .ok_or_else(|| RtspError::SessionNotFound(session_id.to_string()))?;
        let addr = SocketAddr::new(dest.endpoint.group, dest.endpoint.port);
        let n = self.socket.send_to(buf, addr)?;
        self.outgoing_count.fetch_add(1, Ordering::Relaxed);
        STATS_OUTGOING.fetch_add(1, Ordering::Relaxed);
        if n != buf.len() {
            return Err(RtspError::ShortWrite {
                wrote: n,
                wanted: buf.len(),
            });
        }
        Ok(())
    }

    /// Read one datagram. Rejects SSM packets whose source doesn't match
    /// the configured filter; loopback packets are still returned but the
    /// caller may exclude them from statistics via [`Self::is_loopback`].
    pub fn handle_read(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let (n, from) = self.socket.recv_from(buf)?;

        let dests = self.destinations.read();
        if let Some(ssm_source) = dests.iter().find_map(|d| d.endpoint.source) {
            if from.ip() != ssm_source {
                tracing::trace!(%from, expected = %ssm_source, "rejecting non-matching SSM source");
                return self.handle_read(buf);
            }
        }
        drop(dests);

        self.incoming_count.fetch_add(1, Ordering::Relaxed);
        STATS_INCOMING.fetch_add(1, Ordering::Relaxed);
        Ok((n, from))
    }

    /// Whether a received datagram from `from` matches our own bound
    /// address and source port (loopback classification, tunable by
    /// the caller for build-flag-equivalent behavior).
    pub fn is_loopback(&self, from: SocketAddr) -> bool {
        self.socket
            .local_addr()
            .map(|local| local.port() == from.port() && local.ip() == from.ip())
            .unwrap_or(false)
    }

    pub fn incoming_count(&self) -> u64 {
        self.incoming_count.load(Ordering::Relaxed)
    }
    pub fn outgoing_count(&self) -> u64 {
        self.outgoing_count.load(Ordering::Relaxed)
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Drop for GroupSocket {
    /// Leaves all joined multicast groups. A send-only sink does not
    /// explicitly drop membership ahead of this; the destructor is the
    /// single place membership is released.
    fn drop(&mut self) {
        if let Some(group) = self.group {
            let _ = socket::leave_multicast(&self.socket, group, self.iface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_add_destination_idempotent() {
        let gs = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        let ep = GroupEndpointId::new("127.0.0.1".parse().unwrap(), 6000, 1);
        gs.add_destination(ep, 1);
        gs.add_destination(ep, 1);
        assert_eq!(gs.destinations.read().len(), 1);
    }

    #[test]
    fn remove_destination() {
        let gs = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        let ep = GroupEndpointId::new("127.0.0.1".parse().unwrap(), 6000, 1);
        gs.add_destination(ep, 1);
        gs.remove_destination(1);
        assert!(gs.destinations.read().is_empty());
    }

    #[test]
    fn has_multiple_destinations() {
        let gs = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        gs.add_destination(
            GroupEndpointId::new("127.0.0.1".parse().unwrap(), 6000, 1),
            1,
        );
        assert!(!gs.has_multiple_destinations());
        gs.add_destination(
            GroupEndpointId::new("127.0.0.1".parse().unwrap(), 6002, 1),
            2,
        );
        assert!(gs.has_multiple_destinations());
    }

    #[test]
    fn send_and_receive_roundtrip() {
        let receiver = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        let recv_port = receiver.local_port();

        let sender = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        sender.add_destination(
            GroupEndpointId::new("127.0.0.1".parse().unwrap(), recv_port, 1),
            0,
        );
        sender.output(b"hello").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let (n, _from) = receiver.handle_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
