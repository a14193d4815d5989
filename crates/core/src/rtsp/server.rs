//! RTSP server: a [`Scheduler`]-driven connection acceptor
//! and per-connection control-channel reader. Every accepted socket is
//! registered with the same single-threaded event loop that drives RTP
//! sends and delay timers, rather than spawning a thread per connection.

use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::mount::MountRegistry;
use crate::net::socket::{self, ReuseScope};
use crate::rtp::interface::{SENTINEL_HANDBACK, SENTINEL_TEARDOWN, SocketDescriptor};
use crate::rtsp::digest::DigestAuthenticator;
use crate::rtsp::handler::MethodHandler;
use crate::rtsp::request::RtspRequest;
use crate::scheduler::{Mask, RawFdSource, Scheduler};
use crate::session::SessionManager;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=`/`c=` lines. When `None`, host is
    /// inferred from the request URI or the client's socket address.
    pub public_host: Option<String>,
    /// Public RTSP port, for future URL-based headers.
    pub public_port: Option<u16>,
    pub sdp_username: String,
    pub sdp_session_id: String,
    pub sdp_session_version: String,
    pub sdp_session_name: String,
    /// How often to reclaim streams with no remaining session references.
    pub reap_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            public_port: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
            reap_interval: Duration::from_secs(30),
        }
    }
}

const REQUEST_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Assembles bytes delivered one at a time by [`SocketDescriptor`]'s
/// alternative byte handler into complete RTSP requests, dispatches each
/// through a [`MethodHandler`], and writes the response back.
struct ConnectionState {
    descriptor: Arc<Mutex<SocketDescriptor>>,
    inbuf: Vec<u8>,
    handler: MethodHandler,
}

impl ConnectionState {
    /// Buffer one byte off the wire (or act on a framing sentinel).
    /// Complete requests are assembled here but not dispatched — that
    /// needs a live [`Scheduler`], which only [`ConnectionDriver::poll`]
    /// has; see [`Self::drain_requests`].
    fn feed(&mut self, byte: u8) {
        match byte {
            SENTINEL_TEARDOWN => self.handler.cleanup_on_disconnect(),
            SENTINEL_HANDBACK => {}
            _ => self.inbuf.push(byte),
        }
    }

    fn drain_requests(&mut self, scheduler: &mut Scheduler) {
        loop {
            let Some(rel_end) = self
                .inbuf
                .windows(REQUEST_TERMINATOR.len())
                .position(|w| w == REQUEST_TERMINATOR)
            else {
                return;
            };
            let header_end = rel_end + REQUEST_TERMINATOR.len();
            let body_len = content_length(&self.inbuf[..header_end]);
            let total_len = header_end + body_len;
            if self.inbuf.len() < total_len {
                return;
            }

            let raw = String::from_utf8_lossy(&self.inbuf[..total_len]).into_owned();
            self.inbuf.drain(..total_len);

            match RtspRequest::parse(&raw) {
                Ok(request) => {
                    let response = self.handler.handle(&request, scheduler);
                    if let Err(e) = self
                        .descriptor
                        .lock()
                        .write_raw(response.serialize().as_bytes())
                    {
                        tracing::warn!(error = %e, "failed to write RTSP response");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed RTSP request"),
            }
        }
    }
}

fn content_length(head: &[u8]) -> usize {
    let head = String::from_utf8_lossy(head);
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            return value.trim().parse().unwrap_or(0);
        }
    }
    0
}

/// Drives one accepted connection's fd-readiness callback: pumps bytes
/// off the socket and keeps its [`ConnectionState`] alive for as long as
/// the callback is registered.
struct ConnectionDriver {
    descriptor: Arc<Mutex<SocketDescriptor>>,
    state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionDriver {
    fn poll(&mut self, scheduler: &mut Scheduler, _mask: Mask) {
        if let Err(e) = self.descriptor.lock().pump_read() {
            tracing::warn!(error = %e, "connection read failed");
        }
        self.state.lock().drain_requests(scheduler);
    }
}

fn accept_connection(
    scheduler: &mut Scheduler,
    stream: TcpStream,
    peer: SocketAddr,
    session_manager: &SessionManager,
    mounts: &MountRegistry,
    config: &Arc<ServerConfig>,
    authenticator: &Option<Arc<DigestAuthenticator>>,
) -> Result<()> {
    stream.set_nonblocking(true)?;
    let fd = stream.as_raw_fd();
    let descriptor = Arc::new(Mutex::new(SocketDescriptor::new(stream)));

    let mut handler = MethodHandler::new(
        session_manager.clone(),
        peer,
        mounts.clone(),
        config.clone(),
    )
    .with_socket_descriptor(descriptor.clone());
    if let Some(auth) = authenticator {
        handler = handler.with_authenticator(auth.clone());
    }

    let state = Arc::new(Mutex::new(ConnectionState {
        descriptor: descriptor.clone(),
        inbuf: Vec::new(),
        handler,
    }));

    let weak_state = Arc::downgrade(&state);
    descriptor.lock().set_alternative_byte_handler(move |byte| {
        if let Some(state) = weak_state.upgrade() {
            state.lock().feed(byte);
        }
    });

    tracing::info!(%peer, "accepted RTSP connection");

    let mut driver = ConnectionDriver { descriptor, state };
    scheduler.set_background_handling(RawFdSource::new(fd), Mask::READABLE, move |s, m| {
        driver.poll(s, m);
    });
    Ok(())
}

fn schedule_reap(scheduler: &mut Scheduler, mounts: MountRegistry, interval: Duration) {
    scheduler.schedule_delayed(interval, move |sched| {
        let reclaimed = mounts.reap_unreferenced();
        if reclaimed > 0 {
            tracing::info!(reclaimed, "reclaimed idle streams with no remaining sessions");
        }
        schedule_reap(sched, mounts, interval);
    });
}

/// The RTSP server: owns the event loop, the listening
/// socket, and the stream/session registries shared by every connection.
pub struct RtspServer {
    scheduler: Scheduler,
    listener: std::net::TcpListener,
    stop: Arc<AtomicBool>,
    session_manager: SessionManager,
    mounts: MountRegistry,
    config: Arc<ServerConfig>,
    authenticator: Option<Arc<DigestAuthenticator>>,
}

impl RtspServer {
    pub fn new(bind_addr: &str, mounts: MountRegistry, config: ServerConfig) -> Result<Self> {
        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|_| RtspError::BindFailed(0))?;
        let listener = socket::setup_stream(addr, ReuseScope::Reuse, false)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            scheduler: Scheduler::new()?,
            listener,
            stop: Arc::new(AtomicBool::new(false)),
            session_manager: SessionManager::new(),
            mounts,
            config: Arc::new(config),
            authenticator: None,
        })
    }

    pub fn with_authenticator(mut self, authenticator: DigestAuthenticator) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    /// A clone of the stop flag, for callers that move the server into a
    /// background thread (via [`Self::run`]) but still need to signal it
    /// to exit from elsewhere.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn listener_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the event loop until [`Self::stop`] is called from another
    /// thread (e.g. a signal handler or the hosting CLI's stdin reader).
    pub fn run(&mut self) -> Result<()> {
        let fd = self.listener.as_raw_fd();
        let listener_clone = self.listener.try_clone()?;
        let session_manager = self.session_manager.clone();
        let mounts = self.mounts.clone();
        let config = self.config.clone();
        let authenticator = self.authenticator.clone();

        self.scheduler.set_background_handling(
            RawFdSource::new(fd),
            Mask::READABLE,
            move |scheduler, _mask| loop {
                match listener_clone.accept() {
                    Ok((stream, peer)) => {
                        if let Err(e) = accept_connection(
                            scheduler,
                            stream,
                            peer,
                            &session_manager,
                            &mounts,
                            &config,
                            &authenticator,
                        ) {
                            tracing::warn!(error = %e, "failed to register accepted connection");
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            },
        );

        schedule_reap(&mut self.scheduler, self.mounts.clone(), self.config.reap_interval);

        tracing::info!(addr = %self.listener.local_addr()?, "RTSP server listening");
        self.scheduler.do_event_loop(Some(self.stop.as_ref()))
    }
}
