//! RTSP method dispatch (RFC 2326 §10). SETUP negotiates unicast UDP,
//! multicast, or TCP-interleaved transport, and requests may carry an
//! optional Digest challenge.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::mount::MountRegistry;
use crate::net::{GroupEndpointId, GroupSocket};
use crate::rtp::interface::{RtpInterface, SocketDescriptor};
use crate::rtp::sink::MultiFramedRtpSink;
use crate::rtsp::digest::DigestAuthenticator;
use crate::rtsp::request::RtspRequest;
use crate::rtsp::response::RtspResponse;
use crate::rtsp::server::ServerConfig;
use crate::scheduler::Scheduler;
use crate::session::sdp::{self, MediaDescription, SessionDescription};
use crate::session::transport::{Transport, TransportHeader, TransportKind};
use crate::session::{SessionManager, SessionState};

/// Methods that require a valid Digest `Authorization` header when an
/// authenticator is configured.
const PROTECTED_METHODS: [&str; 2] = ["DESCRIBE", "SETUP"];

/// Handles RTSP requests for a single client connection (one TCP control
/// channel, possibly also carrying interleaved RTP/RTCP).
pub struct MethodHandler {
    session_manager: SessionManager,
    mounts: MountRegistry,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    authenticator: Option<Arc<DigestAuthenticator>>,
    /// Present only for connections that negotiate TCP-interleaved
    /// transport; `None` forces every SETUP on this connection to use
    /// UDP/multicast.
    socket_descriptor: Option<Arc<Mutex<SocketDescriptor>>>,
    /// Session IDs created on this connection, for cleanup on disconnect.
    session_ids: Vec<u32>,
}

impl MethodHandler {
    pub fn new(
        session_manager: SessionManager,
        client_addr: SocketAddr,
        mounts: MountRegistry,
        config: Arc<ServerConfig>,
    ) -> Self {
        MethodHandler {
            session_manager,
            mounts,
            client_addr,
            config,
            authenticator: None,
            socket_descriptor: None,
            session_ids: Vec::new(),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<DigestAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_socket_descriptor(mut self, descriptor: Arc<Mutex<SocketDescriptor>>) -> Self {
        self.socket_descriptor = Some(descriptor);
        self
    }

    pub fn session_ids(&self) -> &[u32] {
        &self.session_ids
    }

    /// Called when the underlying connection drops, to release every
    /// session and the stream reference it held.
    pub fn cleanup_on_disconnect(&mut self) {
        for id in self.session_ids.drain(..) {
            if let Some(session) = self.session_manager.remove_session(id) {
                if let Some(media_session) = self.mounts.get(&session.stream_name) {
                    media_session.remove_reference();
                }
            }
        }
    }

    pub fn handle(&mut self, request: &RtspRequest, scheduler: &mut Scheduler) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        if PROTECTED_METHODS.contains(&request.method.as_str())
            && let Some(response) = self.check_authentication(cseq, request)
        {
            return response;
        }

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request, scheduler),
            "PLAY" => self.handle_play(cseq, request),
            "PAUSE" => self.handle_pause(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request, scheduler),
            "GET_PARAMETER" => self.handle_get_parameter(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented().add_header("CSeq", cseq)
            }
        }
    }

    /// Returns `Some(response)` when the request must be rejected —
    /// either a 401 challenge or (if Digest passed) `None` to continue.
    fn check_authentication(&self, cseq: &str, request: &RtspRequest) -> Option<RtspResponse> {
        let authenticator = self.authenticator.as_ref()?;
        match request.get_header("Authorization") {
            Some(header) if authenticator.verify(&request.method, header) => None,
            _ => Some(
                RtspResponse::unauthorized(&authenticator.challenge()).add_header("CSeq", cseq),
            ),
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER",
        )
    }

    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }
        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let media_session = match self.mounts.resolve_from_uri(uri) {
            Some(m) => m,
            None => {
                tracing::warn!(uri, "DESCRIBE for unknown stream");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        let host = self.host_from_uri_or_client(uri);
        let media: Vec<MediaDescription> = media_session
            .subsessions
            .iter()
            .map(|s| s.to_sdp_media())
            .collect();

        let body = sdp::generate(&SessionDescription {
            username: self.config.sdp_username.clone(),
            session_id: self.config.sdp_session_id.clone(),
            session_version: self.config.sdp_session_version.clone(),
            address: host,
            session_name: media_session.session_name.clone(),
            media,
        });

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", uri)
            .with_body(body)
    }

    /// Strip the stream's own path prefix from the request URI, leaving
    /// the per-track control suffix (e.g. `track1`).
    fn control_suffix<'a>(&self, uri: &'a str, stream_name: &str) -> &'a str {
        uri.rsplit_once(stream_name)
            .map(|(_, suffix)| suffix.trim_start_matches('/'))
            .unwrap_or(uri)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest, scheduler: &mut Scheduler) -> RtspResponse {
        let media_session = match self.mounts.resolve_from_uri(&request.uri) {
            Some(m) => m,
            None => {
                tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        let suffix = self.control_suffix(&request.uri, &media_session.stream_name);
        let Some(subsession) = media_session.find_by_control(suffix).cloned() else {
            tracing::warn!(uri = %request.uri, suffix, "SETUP for unknown track");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        let Some(client_transport) = TransportHeader::parse(transport_header) else {
            tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        if client_transport.kind == TransportKind::Interleaved && self.socket_descriptor.is_none() {
            tracing::warn!(%cseq, "SETUP requested interleaved transport on a non-TCP connection");
            return RtspResponse::unsupported_transport().add_header("CSeq", cseq);
        }

        let transport = match self.build_transport(&client_transport) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "failed to negotiate transport");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };

        let interface = match self.build_interface(&transport) {
            Ok(i) => i,
            Err(e) => {
                tracing::error!(error = %e, "failed to build RTP interface");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };
        subsession.install_sink(MultiFramedRtpSink::new(
            subsession.payload_type,
            subsession.ssrc,
            interface,
        ));

        match self.build_rtcp_interface(&transport) {
            Ok(rtcp_interface) => {
                subsession.initiate_rtcp(scheduler, rtcp_interface, self.config.sdp_username.clone());
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to build RTCP interface, reporting disabled for track");
            }
        }

        let session = match request
            .get_header("Session")
            .and_then(SessionManager::parse_session_id)
            .and_then(|id| self.session_manager.get_session(id))
        {
            Some(existing) => existing,
            None => {
                let created = self.session_manager.create_session(&media_session.stream_name);
                media_session.add_reference();
                self.session_ids.push(created.id);
                created
            }
        };
        session.add_track(suffix, transport.clone());

        tracing::info!(
            session_id = session.id_str(),
            stream = %media_session.stream_name,
            track = suffix,
            client = %self.client_addr,
            "track configured via SETUP"
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport.to_header_value())
            .add_header("Session", &session.session_header_value())
    }

    fn build_transport(&self, client: &TransportHeader) -> Result<Transport> {
        let client_addr = self.client_addr.ip();

        match client.kind {
            TransportKind::Interleaved => Ok(Transport {
                kind: TransportKind::Interleaved,
                client_rtp_port: 0,
                client_rtcp_port: 0,
                server_rtp_port: 0,
                server_rtcp_port: 0,
                client_addr: SocketAddr::new(client_addr, 0),
                interleaved_rtp_channel: client.interleaved_rtp_channel,
                interleaved_rtcp_channel: client.interleaved_rtcp_channel,
            }),
            kind => {
                let (server_rtp_port, server_rtcp_port) =
                    self.session_manager.allocate_server_ports()?;
                Ok(Transport {
                    kind,
                    client_rtp_port: client.client_rtp_port.unwrap_or(0),
                    client_rtcp_port: client.client_rtcp_port.unwrap_or(0),
                    server_rtp_port,
                    server_rtcp_port,
                    client_addr: SocketAddr::new(
                        client.destination.unwrap_or(client_addr),
                        client.client_rtp_port.unwrap_or(0),
                    ),
                    interleaved_rtp_channel: None,
                    interleaved_rtcp_channel: None,
                })
            }
        }
    }

    fn build_interface(&self, transport: &Transport) -> Result<RtpInterface> {
        match transport.kind {
            TransportKind::Interleaved => {
                let descriptor = self.socket_descriptor.clone().expect("checked above");
                Ok(RtpInterface::interleaved(
                    descriptor,
                    transport.interleaved_rtp_channel.unwrap_or(0),
                ))
            }
            TransportKind::Multicast => {
                let group_socket = GroupSocket::new_ism(
                    self.client_addr.ip(),
                    transport.client_addr.ip(),
                    transport.server_rtp_port,
                    1,
                )?;
                Ok(RtpInterface::datagram(Arc::new(group_socket)))
            }
            TransportKind::UnicastUdp => {
                let bind_addr = SocketAddr::new(
                    if transport.client_addr.is_ipv4() {
                        std::net::Ipv4Addr::UNSPECIFIED.into()
                    } else {
                        std::net::Ipv6Addr::UNSPECIFIED.into()
                    },
                    transport.server_rtp_port,
                );
                let group_socket = GroupSocket::new_unicast(bind_addr)?;
                group_socket.add_destination(
                    GroupEndpointId::new(transport.client_addr.ip(), transport.client_rtp_port, 1),
                    0,
                );
                Ok(RtpInterface::datagram(Arc::new(group_socket)))
            }
        }
    }

    /// Build the RTCP-side counterpart of [`Self::build_interface`]: same
    /// transport kind, but the RTCP port/channel rather than the RTP one.
    fn build_rtcp_interface(&self, transport: &Transport) -> Result<RtpInterface> {
        match transport.kind {
            TransportKind::Interleaved => {
                let descriptor = self.socket_descriptor.clone().expect("checked above");
                Ok(RtpInterface::interleaved(
                    descriptor,
                    transport.interleaved_rtcp_channel.unwrap_or(1),
                ))
            }
            TransportKind::Multicast => {
                let group_socket = GroupSocket::new_ism(
                    self.client_addr.ip(),
                    transport.client_addr.ip(),
                    transport.server_rtcp_port,
                    1,
                )?;
                Ok(RtpInterface::datagram(Arc::new(group_socket)))
            }
            TransportKind::UnicastUdp => {
                let bind_addr = SocketAddr::new(
                    if transport.client_addr.is_ipv4() {
                        std::net::Ipv4Addr::UNSPECIFIED.into()
                    } else {
                        std::net::Ipv6Addr::UNSPECIFIED.into()
                    },
                    transport.server_rtcp_port,
                );
                let group_socket = GroupSocket::new_unicast(bind_addr)?;
                group_socket.add_destination(
                    GroupEndpointId::new(transport.client_addr.ip(), transport.client_rtcp_port, 1),
                    0,
                );
                Ok(RtpInterface::datagram(Arc::new(group_socket)))
            }
        }
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = self.extract_session_id(request) else {
            tracing::warn!(%cseq, "PLAY missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        let Some(session) = self.session_manager.get_session(session_id) else {
            tracing::warn!(session_id, "PLAY for unknown session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        session.set_state(SessionState::Playing);
        tracing::info!(session_id = session.id_str(), "session started playing");

        let mut resp = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-");

        if let Some(media_session) = self.mounts.get(&session.stream_name) {
            let rtp_info: Vec<String> = media_session
                .subsessions
                .iter()
                .filter_map(|s| {
                    s.rtp_info()
                        .map(|(seq, ts)| format!("url={}/{};seq={};rtptime={}", request.uri, s.control_suffix, seq, ts))
                })
                .collect();
            if !rtp_info.is_empty() {
                resp = resp.add_header("RTP-Info", &rtp_info.join(","));
            }
        }

        resp
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = self.extract_session_id(request) else {
            tracing::warn!(%cseq, "PAUSE missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match self.session_manager.get_session(session_id) {
            Some(session) => {
                session.set_state(SessionState::Paused);
                tracing::info!(session_id = session.id_str(), "session paused");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.session_header_value())
            }
            None => {
                tracing::warn!(session_id, "PAUSE for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest, scheduler: &mut Scheduler) -> RtspResponse {
        let Some(session_id) = self.extract_session_id(request) else {
            tracing::warn!(%cseq, "TEARDOWN missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match self.session_manager.remove_session(session_id) {
            Some(session) => {
                if let Some(media_session) = self.mounts.get(&session.stream_name) {
                    for subsession in &media_session.subsessions {
                        subsession.stop_rtcp(scheduler, Some("session torn down"));
                    }
                    media_session.remove_reference();
                }
                self.session_ids.retain(|id| *id != session_id);
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok().add_header("CSeq", cseq)
            }
            None => {
                tracing::warn!(session_id, "TEARDOWN for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(id) = self.extract_session_id(request)
            && self.session_manager.get_session(id).is_some()
        {
            resp = resp.add_header("Session", &format!("{id:08X}"));
        }
        resp
    }

    /// Session id from the `Session` header, stripping any `;timeout=`
    /// suffix (RFC 2326 §12.37).
    fn extract_session_id(&self, request: &RtspRequest) -> Option<u32> {
        request
            .get_header("Session")
            .and_then(SessionManager::parse_session_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::media_session::{MediaSession, MediaSubsession};

    fn handler_with_stream() -> MethodHandler {
        let mounts = MountRegistry::new();
        mounts.add(
            "/stream",
            MediaSession::new("/stream", "Test")
                .with_subsession(MediaSubsession::new("track1", 96, "H264/90000")),
        );
        MethodHandler::new(
            SessionManager::new(),
            "127.0.0.1:9000".parse().unwrap(),
            mounts,
            Arc::new(ServerConfig::default()),
        )
    }

    fn parse(raw: &str) -> RtspRequest {
        RtspRequest::parse(raw).unwrap()
    }

    fn test_scheduler() -> Scheduler {
        Scheduler::new().unwrap()
    }

    #[test]
    fn options_lists_methods() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse("OPTIONS rtsp://localhost/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let resp = handler.handle(&req, &mut scheduler);
        assert_eq!(resp.status_code, 200);
    }

    #[test]
    fn describe_unknown_stream_is_404() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse("DESCRIBE rtsp://localhost/missing RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let resp = handler.handle(&req, &mut scheduler);
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn describe_known_stream_returns_sdp() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse("DESCRIBE rtsp://localhost/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let resp = handler.handle(&req, &mut scheduler);
        assert_eq!(resp.status_code, 200);
        assert!(resp.body.unwrap().contains("a=control:track1"));
    }

    #[test]
    fn setup_without_transport_is_bad_request() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse("SETUP rtsp://localhost/stream/track1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        let resp = handler.handle(&req, &mut scheduler);
        assert_eq!(resp.status_code, 400);
    }

    #[test]
    fn setup_unicast_then_play_then_teardown() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let setup = parse(
            "SETUP rtsp://localhost/stream/track1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=7000-7001\r\n\r\n",
        );
        let resp = handler.handle(&setup, &mut scheduler);
        assert_eq!(resp.status_code, 200);
        let session_header = resp
            .headers
            .iter()
            .find(|(k, _)| k == "Session")
            .unwrap()
            .1
            .clone();
        let session_id = session_header.split(';').next().unwrap().to_string();

        let play = parse(&format!(
            "PLAY rtsp://localhost/stream RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n\r\n"
        ));
        assert_eq!(handler.handle(&play, &mut scheduler).status_code, 200);

        let teardown = parse(&format!(
            "TEARDOWN rtsp://localhost/stream RTSP/1.0\r\nCSeq: 4\r\nSession: {session_id}\r\n\r\n"
        ));
        assert_eq!(handler.handle(&teardown, &mut scheduler).status_code, 200);
    }

    #[test]
    fn setup_interleaved_without_descriptor_is_461() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse(
            "SETUP rtsp://localhost/stream/track1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;interleaved=0-1\r\n\r\n",
        );
        assert_eq!(handler.handle(&req, &mut scheduler).status_code, 461);
    }

    #[test]
    fn play_unknown_session_is_454() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse("PLAY rtsp://localhost/stream RTSP/1.0\r\nCSeq: 2\r\nSession: DEADBEEF\r\n\r\n");
        assert_eq!(handler.handle(&req, &mut scheduler).status_code, 454);
    }

    #[test]
    fn authenticated_handler_challenges_describe() {
        let mut handler = handler_with_stream().with_authenticator(Arc::new(
            DigestAuthenticator::new("rtsp-rs", vec![]),
        ));
        let mut scheduler = test_scheduler();
        let req = parse("DESCRIBE rtsp://localhost/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        assert_eq!(handler.handle(&req, &mut scheduler).status_code, 401);
    }

    #[test]
    fn setup_initiates_rtcp_reporting() {
        let mut handler = handler_with_stream();
        let mut scheduler = test_scheduler();
        let req = parse(
            "SETUP rtsp://localhost/stream/track1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=7000-7001\r\n\r\n",
        );
        assert_eq!(handler.handle(&req, &mut scheduler).status_code, 200);

        let media_session = handler.mounts.get("/stream").unwrap();
        let subsession = media_session.find_by_control("track1").unwrap();
        scheduler.single_step(Duration::from_millis(20)).unwrap();
        assert!(subsession.has_rtcp());
    }
}
