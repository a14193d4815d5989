//! RTSP client state machine: reuses the same request/response wire
//! format the server uses (`rtsp::request`, `rtsp::response`), plus a
//! REGISTER listener for servers that dial out and hand their stream to
//! a waiting client instead of being connected to directly.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::rtsp::digest;
use crate::session::sdp::{self, SessionDescription};
use crate::session::transport::Transport;

/// A parsed RTSP response, the client-side counterpart of
/// [`crate::rtsp::request::RtspRequest`] (the server never needs to parse
/// responses, so that type has no such mirror).
#[derive(Debug)]
pub struct RtspClientResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspClientResponse {
    fn parse(raw: &str) -> Result<Self> {
        let header_end = raw.find("\r\n\r\n").map(|i| i + 4).unwrap_or(raw.len());
        let (head, rest) = raw.split_at(header_end);
        let mut lines = head.lines();

        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;
        let parts: Vec<&str> = status_line.splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }
        let status_code: u16 = parts[1].parse().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidRequestLine,
        })?;
        let status_text = parts.get(2).unwrap_or(&"").to_string();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        let content_length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);

        let body = if content_length > 0 && rest.len() >= content_length {
            Some(rest[..content_length].to_string())
        } else {
            None
        };

        Ok(RtspClientResponse {
            status_code,
            status_text,
            headers,
            body,
        })
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one complete RTSP message (response or request) off a blocking
/// stream: header block up to `\r\n\r\n`, then the declared `Content-Length`
/// body, if any.
fn read_message(stream: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]);
    let content_length: usize = head
        .lines()
        .find_map(|l| l.split_once(':').filter(|(k, _)| k.trim().eq_ignore_ascii_case("Content-Length")))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::TruncatedBody,
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(String::from_utf8_lossy(&buf[..header_end + content_length]).into_owned())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Client-side state machine driving one RTSP control connection:
/// OPTIONS/DESCRIBE/SETUP/PLAY/PAUSE/TEARDOWN, plus the CSeq bookkeeping
/// and optional Digest credentials RFC 2326 leaves to the client.
pub struct RtspClient {
    stream: TcpStream,
    next_cseq: u32,
    session: Option<String>,
    credentials: Option<(String, String)>,
}

impl RtspClient {
    /// Open a control connection to `addr` (e.g. `"127.0.0.1:8554"`).
    pub fn connect(addr: &str) -> Result<Self> {
        let server: SocketAddr = addr
            .parse()
            .map_err(|_| RtspError::BindFailed(0))?;
        let stream = TcpStream::connect(server)?;
        Ok(Self::from_stream(stream))
    }

    fn from_stream(stream: TcpStream) -> Self {
        RtspClient {
            stream,
            next_cseq: 1,
            session: None,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Send one request and return its parsed response. If the server
    /// challenges with 401 and credentials are configured, retries once
    /// with an `Authorization` header (RFC 2617 §3.2.1).
    fn request(
        &mut self,
        method: &str,
        uri: &str,
        extra_headers: &[(&str, String)],
        body: Option<&str>,
    ) -> Result<RtspClientResponse> {
        let response = self.send_once(method, uri, extra_headers, body, None)?;
        if response.status_code != 401 {
            return Ok(response);
        }
        let Some((username, password)) = self.credentials.clone() else {
            return Ok(response);
        };
        let Some(challenge) = response.get_header("WWW-Authenticate") else {
            return Ok(response);
        };
        let Some((realm, nonce)) = digest::parse_challenge(challenge) else {
            return Ok(response);
        };
        let auth = digest::client_authorization_header(&username, &realm, &password, &nonce, method, uri);
        self.send_once(method, uri, extra_headers, body, Some(auth))
    }

    fn send_once(
        &mut self,
        method: &str,
        uri: &str,
        extra_headers: &[(&str, String)],
        body: Option<&str>,
        authorization: Option<String>,
    ) -> Result<RtspClientResponse> {
        let cseq = self.next_cseq;
        self.next_cseq += 1;

        let mut request = format!("{method} {uri} RTSP/1.0\r\nCSeq: {cseq}\r\n");
        if let Some(session) = &self.session {
            request.push_str(&format!("Session: {session}\r\n"));
        }
        if let Some(auth) = &authorization {
            request.push_str(&format!("Authorization: {auth}\r\n"));
        }
        for (name, value) in extra_headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(body) = body {
            request.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
        } else {
            request.push_str("\r\n");
        }

        tracing::trace!(method, uri, cseq, "sending RTSP request");
        self.stream.write_all(request.as_bytes())?;
        let raw = read_message(&mut self.stream)?;
        RtspClientResponse::parse(&raw)
    }

    pub fn options(&mut self, uri: &str) -> Result<RtspClientResponse> {
        self.request("OPTIONS", uri, &[], None)
    }

    /// DESCRIBE the resource at `uri`, returning its parsed SDP.
    pub fn describe(&mut self, uri: &str) -> Result<SessionDescription> {
        let response = self.request("DESCRIBE", uri, &[], None)?;
        let body = response.body.ok_or_else(|| RtspError::SdpParse("DESCRIBE returned no body".into()))?;
        sdp::parse(&body)
    }

    /// SETUP one track, adopting the `Session` header from the response
    /// for subsequent requests. `transport_header` is the client's
    /// proposed `Transport` value (e.g. `"RTP/AVP;unicast;client_port=8000-8001"`).
    pub fn setup(&mut self, uri: &str, transport_header: &str) -> Result<Transport> {
        let response = self.request(
            "SETUP",
            uri,
            &[("Transport", transport_header.to_string())],
            None,
        )?;
        if let Some(session) = response.get_header("Session") {
            self.session = Some(session.split(';').next().unwrap_or(session).to_string());
        }
        let negotiated = response
            .get_header("Transport")
            .and_then(crate::session::transport::TransportHeader::parse)
            .ok_or_else(|| RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

        Ok(Transport {
            kind: negotiated.kind,
            client_rtp_port: negotiated.client_rtp_port.unwrap_or(0),
            client_rtcp_port: negotiated.client_rtcp_port.unwrap_or(0),
            server_rtp_port: negotiated.server_rtp_port.unwrap_or(0),
            server_rtcp_port: negotiated.server_rtcp_port.unwrap_or(0),
            client_addr: "0.0.0.0:0".parse().unwrap(),
            interleaved_rtp_channel: negotiated.interleaved_rtp_channel,
            interleaved_rtcp_channel: negotiated.interleaved_rtcp_channel,
        })
    }

    pub fn play(&mut self, uri: &str) -> Result<RtspClientResponse> {
        self.request("PLAY", uri, &[("Range", "npt=0.000-".to_string())], None)
    }

    pub fn pause(&mut self, uri: &str) -> Result<RtspClientResponse> {
        self.request("PAUSE", uri, &[], None)
    }

    pub fn teardown(&mut self, uri: &str) -> Result<RtspClientResponse> {
        let response = self.request("TEARDOWN", uri, &[], None)?;
        self.session = None;
        Ok(response)
    }

    pub fn get_parameter(&mut self, uri: &str) -> Result<RtspClientResponse> {
        self.request("GET_PARAMETER", uri, &[], None)
    }
}

/// Listens for a server-initiated reverse connection: the server dials
/// out and sends a `REGISTER` request announcing the URL it wants played
/// back to it, a pattern some IP cameras use instead of accepting
/// inbound RTSP connections directly.
pub struct RegisterListener {
    listener: TcpListener,
}

impl RegisterListener {
    pub fn bind(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr.parse().map_err(|_| RtspError::BindFailed(0))?;
        Ok(Self {
            listener: std::net::TcpListener::bind(addr)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until one incoming connection sends a REGISTER request,
    /// acknowledge it with 200 OK, and hand back a ready-to-use
    /// [`RtspClient`] plus the URL the server asked to be registered.
    pub fn accept_register(&self) -> Result<(RtspClient, String)> {
        let (mut stream, peer) = self.listener.accept()?;
        let raw = read_message(&mut stream)?;

        let first_line = raw.lines().next().unwrap_or("");
        let parts: Vec<&str> = first_line.split_whitespace().collect();
        if parts.len() != 3 || parts[0] != "REGISTER" {
            let _ = stream.write_all(b"RTSP/1.0 400 Bad Request\r\n\r\n");
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }
        let uri = parts[1].to_string();

        let cseq = raw
            .lines()
            .find_map(|l| l.split_once(':').filter(|(k, _)| k.trim().eq_ignore_ascii_case("CSeq")))
            .map(|(_, v)| v.trim())
            .unwrap_or("0");

        tracing::info!(%peer, uri, "accepted REGISTER reverse connection");
        stream.write_all(format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n").as_bytes())?;

        Ok((RtspClient::from_stream(stream), uri))
    }
}
