//! Error types for the streaming core.

use std::fmt;

/// Errors that can occur anywhere in the core.
///
/// Variants map to the failure classes enumerated in the error-handling
/// design: transport, protocol parse, authentication, resource, and
/// session state.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `setsockopt` call failed for the named option.
    #[error("setsockopt failed: {0}")]
    SetSockOpt(&'static str),

    /// Bind failed for the given port.
    #[error("bind failed on port {0}")]
    BindFailed(u16),

    /// A send wrote fewer bytes than requested.
    #[error("short write: wrote {wrote} of {wanted} bytes")]
    ShortWrite { wrote: usize, wanted: usize },

    /// No session with the given ID exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP has not been completed for this session.
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// Attempted to send media to a session that is not in the Playing state.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// Server/client has not been started.
    #[error("not started")]
    NotStarted,

    /// Start was called while already running.
    #[error("already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request or response message.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Failed to parse an SDP description.
    #[error("SDP parse error: {0}")]
    SdpParse(String),

    /// Failed to parse or validate a MIKEY message.
    #[error("MIKEY parse error: {0}")]
    MikeyParse(String),

    /// Server-side UDP port allocation exhausted the configured range.
    #[error("port range exhausted")]
    PortRangeExhausted,

    /// No mount registered at the requested path/stream name.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// Requested RTSP method not valid for the session's current state.
    #[error("method not valid in current state")]
    InvalidState,

    /// SRTP authentication tag did not match.
    #[error("SRTP authentication failed")]
    SrtpAuthFailed,

    /// SRTP/SRTCP packet shorter than the minimum (header + MKI + tag).
    #[error("SRTP packet too short")]
    SrtpPacketTooShort,

    /// RTSP Digest authentication challenge/response mismatch.
    #[error("digest authentication failed")]
    DigestAuthFailed,

    /// A packet exceeded the configured output-buffer maximum.
    #[error("packet too large for output buffer: {0} bytes")]
    PacketTooLarge(usize),

    /// Scheduler trigger id or task token referenced an entry that
    /// no longer exists; callers should treat this as benign.
    #[error("unknown scheduler handle")]
    UnknownSchedulerHandle,
}

/// Specific kind of RTSP message parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request/status line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Content-Length present but body shorter than advertised.
    TruncatedBody,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TruncatedBody => write!(f, "truncated body"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
