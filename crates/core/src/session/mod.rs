//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is a server-side state object created during SETUP and
//! destroyed by TEARDOWN (or timeout). It tracks:
//!
//! - A unique session ID (32-bit, rendered as an 8-char hex
//!   string in the `Session` header).
//! - The playback state: Ready -> Playing <-> Paused.
//! - Per-track transport parameters negotiated during SETUP.
//! - A timeout (default 60s, per RFC 2326 §12.37).
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP         -> Ready
//! PLAY          -> Playing
//! PAUSE         -> Paused   (from Playing)
//! PLAY          -> Playing  (from Paused)
//! TEARDOWN      -> (removed)
//! TCP disconnect -> (removed, via cleanup)
//! ```

pub mod media_session;
pub mod sdp;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use rand::Rng;

use crate::error::Result;
pub use transport::Transport;

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Playing,
    Paused,
}

/// Per-track transport binding established during SETUP.
pub struct TrackBinding {
    pub control_suffix: String,
    pub transport: Transport,
}

/// A single RTSP session (RFC 2326 §3). One session may span several
/// tracks of the same stream, each with its own negotiated transport.
pub struct Session {
    /// 32-bit session identifier, rendered as 8-char hex.
    pub id: u32,
    pub stream_name: String,
    pub tracks: RwLock<Vec<TrackBinding>>,
    pub state: RwLock<SessionState>,
    pub timeout_secs: u64,
}

impl Session {
    fn new(id: u32, stream_name: &str) -> Self {
        Session {
            id,
            stream_name: stream_name.to_string(),
            tracks: RwLock::new(Vec::new()),
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    pub fn id_str(&self) -> String {
        format!("{:08X}", self.id)
    }

    pub fn add_track(&self, control_suffix: &str, transport: Transport) {
        tracing::debug!(
            session_id = self.id_str(),
            control_suffix,
            client_addr = %transport.client_addr,
            "transport configured"
        );
        self.tracks.write().push(TrackBinding {
            control_suffix: control_suffix.to_string(),
            transport,
        });
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = self.id_str(), old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state() == SessionState::Playing
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id_str(), self.timeout_secs)
    }
}

/// Thread-safe registry of active RTSP sessions. Session ids are random
/// 32-bit values rather than a monotonic counter, so a restarted
/// server doesn't collide with a stale client session id.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<u32, Arc<Session>>>>,
    next_server_port: Arc<AtomicU32>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_server_port: Arc::new(AtomicU32::new(SERVER_PORT_MIN as u32)),
        }
    }

    /// Create a new session bound to `stream_name`, with a freshly
    /// generated non-colliding 32-bit id.
    pub fn create_session(&self, stream_name: &str) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        let id = loop {
            let candidate: u32 = rand::rng().random();
            if candidate != 0 && !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session::new(id, stream_name));
        sessions.insert(id, session.clone());
        tracing::debug!(session_id = session.id_str(), stream_name, total_sessions = sessions.len(), "session created");
        session
    }

    pub fn get_session(&self, id: u32) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn parse_session_id(raw: &str) -> Option<u32> {
        let trimmed = raw.split(';').next().unwrap_or(raw).trim();
        u32::from_str_radix(trimmed, 16).ok()
    }

    pub fn remove_session(&self, id: u32) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(&id);
        if removed.is_some() {
            tracing::debug!(session_id = format!("{id:08X}"), "session removed");
        }
        removed
    }

    /// Allocate a pair of (RTP, RTCP) server ports, wrapping back to
    /// `SERVER_PORT_MIN` when the range is exhausted.
    pub fn allocate_server_ports(&self) -> Result<(u16, u16)> {
        let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst) as u64;
        if rtp > SERVER_PORT_MAX {
            self.next_server_port.store(SERVER_PORT_MIN as u32, Ordering::SeqCst);
            let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst) as u64;
            return Ok((rtp as u16, rtp as u16 + 1));
        }
        Ok((rtp as u16, rtp as u16 + 1))
    }

    pub fn get_playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().filter(|s| s.is_playing()).cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
