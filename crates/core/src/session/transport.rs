//! Negotiated RTP/RTCP transport parameters (RFC 2326 §12.39).
//!
//! Parses unicast UDP, TCP-interleaved (`RTP/AVP/TCP;interleaved=`), and
//! multicast transport specifiers.

use std::net::SocketAddr;

/// Which transport a negotiated session actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    UnicastUdp,
    Multicast,
    Interleaved,
}

/// Parsed client-side transport spec from the RTSP `Transport` header,
/// covering every transport this crate negotiates.
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub kind: TransportKind,
    pub client_rtp_port: Option<u16>,
    pub client_rtcp_port: Option<u16>,
    pub server_rtp_port: Option<u16>,
    pub server_rtcp_port: Option<u16>,
    pub interleaved_rtp_channel: Option<u8>,
    pub interleaved_rtcp_channel: Option<u8>,
    pub destination: Option<std::net::IpAddr>,
    pub ttl: Option<u8>,
}

impl TransportHeader {
    /// Parse one `Transport` header value. RFC 2326 §12.39 allows a
    /// comma-separated list of alternatives in priority order; this
    /// parses only the first alternative the server can satisfy.
    pub fn parse(header: &str) -> Option<Self> {
        for alternative in header.split(',') {
            if let Some(parsed) = Self::parse_one(alternative.trim()) {
                return Some(parsed);
            }
        }
        None
    }

    fn parse_one(spec: &str) -> Option<Self> {
        let mut client_rtp_port = None;
        let mut client_rtcp_port = None;
        let mut server_rtp_port = None;
        let mut server_rtcp_port = None;
        let mut interleaved_rtp_channel = None;
        let mut interleaved_rtcp_channel = None;
        let mut destination = None;
        let mut ttl = None;
        let mut is_multicast = false;
        let mut is_tcp = spec.contains("RTP/AVP/TCP");

        for part in spec.split(';') {
            let part = part.trim();
            if part == "multicast" {
                is_multicast = true;
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = split_port_pair(ports)?;
                client_rtp_port = Some(rtp);
                client_rtcp_port = Some(rtcp);
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                let (rtp, rtcp) = split_port_pair(ports)?;
                server_rtp_port = Some(rtp);
                server_rtcp_port = Some(rtcp);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                let (rtp, rtcp) = split_port_pair(channels)?;
                interleaved_rtp_channel = Some(rtp as u8);
                interleaved_rtcp_channel = Some(rtcp as u8);
                is_tcp = true;
            } else if let Some(dest) = part.strip_prefix("destination=") {
                destination = dest.parse().ok();
            } else if let Some(t) = part.strip_prefix("ttl=") {
                ttl = t.parse().ok();
            }
        }

        let kind = if is_tcp {
            TransportKind::Interleaved
        } else if is_multicast {
            TransportKind::Multicast
        } else {
            TransportKind::UnicastUdp
        };

        if kind == TransportKind::Interleaved && interleaved_rtp_channel.is_none() {
            return None;
        }
        if kind == TransportKind::UnicastUdp && client_rtp_port.is_none() {
            return None;
        }

        Some(Self {
            kind,
            client_rtp_port,
            client_rtcp_port,
            server_rtp_port,
            server_rtcp_port,
            interleaved_rtp_channel,
            interleaved_rtcp_channel,
            destination,
            ttl,
        })
    }
}

fn split_port_pair(s: &str) -> Option<(u16, u16)> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return None;
    }
    Some((parts[0].parse().ok()?, parts[1].parse().ok()?))
}

/// Fully negotiated transport for one session subsession, after the
/// server has allocated its own side (RFC 2326 §12.39).
#[derive(Debug, Clone)]
pub struct Transport {
    pub kind: TransportKind,
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
    pub server_rtp_port: u16,
    pub server_rtcp_port: u16,
    pub client_addr: SocketAddr,
    pub interleaved_rtp_channel: Option<u8>,
    pub interleaved_rtcp_channel: Option<u8>,
}

impl Transport {
    /// Render the `Transport` response header value the server returns
    /// from SETUP.
    pub fn to_header_value(&self) -> String {
        match self.kind {
            TransportKind::Interleaved => format!(
                "RTP/AVP/TCP;interleaved={}-{}",
                self.interleaved_rtp_channel.unwrap_or(0),
                self.interleaved_rtcp_channel.unwrap_or(1)
            ),
            TransportKind::Multicast => format!(
                "RTP/AVP;multicast;client_port={}-{};server_port={}-{};ttl=1",
                self.client_rtp_port, self.client_rtcp_port, self.server_rtp_port, self.server_rtcp_port
            ),
            TransportKind::UnicastUdp => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                self.client_rtp_port, self.client_rtcp_port, self.server_rtp_port, self.server_rtcp_port
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_unicast_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.client_rtp_port, Some(5000));
        assert_eq!(th.client_rtcp_port, Some(5001));
        assert_eq!(th.kind, TransportKind::UnicastUdp);
    }

    #[test]
    fn parse_no_client_port_fails_unicast() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn parse_interleaved_transport() {
        let th = TransportHeader::parse("RTP/AVP/TCP;interleaved=0-1").unwrap();
        assert_eq!(th.kind, TransportKind::Interleaved);
        assert_eq!(th.interleaved_rtp_channel, Some(0));
        assert_eq!(th.interleaved_rtcp_channel, Some(1));
    }

    #[test]
    fn parse_multicast_transport_with_ttl() {
        let th = TransportHeader::parse("RTP/AVP;multicast;destination=239.1.1.1;ttl=16;client_port=5000-5001").unwrap();
        assert_eq!(th.kind, TransportKind::Multicast);
        assert_eq!(th.ttl, Some(16));
        assert_eq!(th.destination, Some("239.1.1.1".parse().unwrap()));
    }

    #[test]
    fn picks_first_satisfiable_alternative() {
        let header = "RTP/AVP/TCP;interleaved=0-1,RTP/AVP;unicast;client_port=6000-6001";
        let th = TransportHeader::parse(header).unwrap();
        assert_eq!(th.kind, TransportKind::Interleaved);
    }

    #[test]
    fn parse_captures_server_port() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001").unwrap();
        assert_eq!(th.server_rtp_port, Some(5000));
        assert_eq!(th.server_rtcp_port, Some(5001));
    }

    #[test]
    fn response_header_for_unicast() {
        let t = Transport {
            kind: TransportKind::UnicastUdp,
            client_rtp_port: 8000,
            client_rtcp_port: 8001,
            server_rtp_port: 5000,
            server_rtcp_port: 5001,
            client_addr: "127.0.0.1:8000".parse().unwrap(),
            interleaved_rtp_channel: None,
            interleaved_rtcp_channel: None,
        };
        assert_eq!(
            t.to_header_value(),
            "RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001"
        );
    }
}
