//! Low-level socket setup: option configuration shared by every UDP/TCP endpoint.
//!
//! Wraps [`socket2::Socket`] to provide the option set that `std::net`
//! doesn't expose: `SO_REUSEPORT`, `IPV6_V6ONLY`, multicast TTL/interface
//! selection, and buffer sizing, covering unicast, multicast, and
//! TCP listening sockets alike.

use std::net::{IpAddr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, RtspError};

/// Whether newly created sockets should set `SO_REUSEADDR`/`SO_REUSEPORT`.
/// `NoReuse` disables this for callers that need exclusive binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseScope {
    Reuse,
    NoReuse,
}

fn new_raw_socket(addr: IpAddr, ty: Type, proto: Option<Protocol>) -> Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket =
        Socket::new(domain, ty, proto).map_err(|_| RtspError::SetSockOpt("socket_create"))?;
    if domain == Domain::IPV6 {
        socket
            .set_only_v6(true)
            .map_err(|_| RtspError::SetSockOpt("IPV6_V6ONLY"))?;
    }
    Ok(socket)
}

/// Create, configure, and bind a UDP datagram socket.
///
/// `SO_REUSEADDR` (and `SO_REUSEPORT` where available) are set
/// unless `scope` is [`ReuseScope::NoReuse`].
pub fn setup_datagram(addr: SocketAddr, scope: ReuseScope) -> Result<UdpSocket> {
    let socket = new_raw_socket(addr.ip(), Type::DGRAM, Some(Protocol::UDP))?;

    if scope == ReuseScope::Reuse {
        socket
            .set_reuse_address(true)
            .map_err(|_| RtspError::SetSockOpt("SO_REUSEADDR"))?;
        #[cfg(unix)]
        socket
            .set_reuse_port(true)
            .map_err(|_| RtspError::SetSockOpt("SO_REUSEPORT"))?;
    }

    socket
        .bind(&addr.into())
        .map_err(|_| RtspError::BindFailed(addr.port()))?;
    socket.set_nonblocking(true)?;

    tracing::debug!(%addr, ?scope, "datagram socket bound");
    Ok(socket.into())
}

/// Create, configure, and bind a TCP listening socket.
pub fn setup_stream(
    addr: SocketAddr,
    scope: ReuseScope,
    keepalive: bool,
) -> Result<std::net::TcpListener> {
    let socket = new_raw_socket(addr.ip(), Type::STREAM, Some(Protocol::TCP))?;

    if scope == ReuseScope::Reuse {
        socket
            .set_reuse_address(true)
            .map_err(|_| RtspError::SetSockOpt("SO_REUSEADDR"))?;
    }
    if keepalive {
        socket
            .set_keepalive(true)
            .map_err(|_| RtspError::SetSockOpt("SO_KEEPALIVE"))?;
    }

    socket
        .bind(&addr.into())
        .map_err(|_| RtspError::BindFailed(addr.port()))?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Enable `SO_KEEPALIVE` on an already-connected stream socket.
pub fn set_keepalive(stream: &std::net::TcpStream) -> Result<()> {
    let socket = socket2::SockRef::from(stream);
    socket
        .set_keepalive(true)
        .map_err(|_| RtspError::SetSockOpt("SO_KEEPALIVE"))?;
    Ok(())
}

/// Grow a socket's receive buffer to at least `target` bytes (best effort
/// — the kernel may clamp to a maximum).
pub fn increase_recv_buffer(socket: &UdpSocket, target: usize) -> Result<()> {
    let sock_ref = socket2::SockRef::from(socket);
    sock_ref
        .set_recv_buffer_size(target)
        .map_err(|_| RtspError::SetSockOpt("SO_RCVBUF"))?;
    Ok(())
}

/// Join a multicast group on the given socket.
pub fn join_multicast(socket: &UdpSocket, group: IpAddr, iface: IpAddr) -> Result<()> {
    match (group, iface) {
        (IpAddr::V4(g), IpAddr::V4(i)) => socket.join_multicast_v4(&g, &i)?,
        (IpAddr::V6(g), _) => socket.join_multicast_v6(&g, 0)?,
        _ => return Err(RtspError::SetSockOpt("join_multicast: family mismatch")),
    }
    Ok(())
}

pub fn leave_multicast(socket: &UdpSocket, group: IpAddr, iface: IpAddr) -> Result<()> {
    match (group, iface) {
        (IpAddr::V4(g), IpAddr::V4(i)) => socket.leave_multicast_v4(&g, &i)?,
        (IpAddr::V6(g), _) => socket.leave_multicast_v6(&g, 0)?,
        _ => return Err(RtspError::SetSockOpt("leave_multicast: family mismatch")),
    }
    Ok(())
}

/// Join a source-specific multicast group. Callers should fall back to
/// [`join_multicast`] (any-source) if source-specific multicast join fails.
pub fn join_ssm(socket: &UdpSocket, group: IpAddr, source: IpAddr) -> Result<()> {
    let sock_ref = socket2::SockRef::from(socket);
    match (group, source) {
        (IpAddr::V4(g), IpAddr::V4(s)) => sock_ref
            .join_ssm_v4(&s, &g, &std::net::Ipv4Addr::UNSPECIFIED)
            .map_err(|_| RtspError::SetSockOpt("IP_ADD_SOURCE_MEMBERSHIP"))?,
        _ => return Err(RtspError::SetSockOpt("join_ssm: requires IPv4")),
    }
    Ok(())
}

pub fn leave_ssm(socket: &UdpSocket, group: IpAddr, source: IpAddr) -> Result<()> {
    let sock_ref = socket2::SockRef::from(socket);
    match (group, source) {
        (IpAddr::V4(g), IpAddr::V4(s)) => sock_ref
            .leave_ssm_v4(&s, &g, &std::net::Ipv4Addr::UNSPECIFIED)
            .map_err(|_| RtspError::SetSockOpt("IP_DROP_SOURCE_MEMBERSHIP"))?,
        _ => return Err(RtspError::SetSockOpt("leave_ssm: requires IPv4")),
    }
    Ok(())
}

/// Set the outgoing multicast TTL. Tracked per socket by the caller
/// (group-socket layer) to avoid redundant setsockopt calls.
pub fn set_multicast_ttl(socket: &UdpSocket, ttl: u8) -> Result<()> {
    let sock_ref = socket2::SockRef::from(socket);
    sock_ref
        .set_multicast_ttl_v4(ttl as u32)
        .map_err(|_| RtspError::SetSockOpt("IP_MULTICAST_TTL"))?;
    // Loopback enabled for IPv4 by default; IPv6 left at its platform default.
    sock_ref
        .set_multicast_loop_v4(true)
        .map_err(|_| RtspError::SetSockOpt("IP_MULTICAST_LOOP"))?;
    Ok(())
}

/// The locally-bound port of a socket (used after binding to port 0).
pub fn get_source_port(socket: &UdpSocket) -> Result<u16> {
    Ok(socket.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_datagram_ephemeral() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = setup_datagram(addr, ReuseScope::Reuse).unwrap();
        assert!(get_source_port(&socket).unwrap() > 0);
    }

    #[test]
    fn bind_stream_ephemeral() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = setup_stream(addr, ReuseScope::Reuse, true).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn multicast_join_leave_roundtrip() {
        let addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let socket = setup_datagram(addr, ReuseScope::Reuse).unwrap();
        let group: IpAddr = "239.1.1.1".parse().unwrap();
        let iface: IpAddr = "0.0.0.0".parse().unwrap();
        join_multicast(&socket, group, iface).unwrap();
        leave_multicast(&socket, group, iface).unwrap();
    }
}
