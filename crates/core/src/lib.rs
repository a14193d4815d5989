//! # rtsp — single-threaded RTSP/RTP/SRTP streaming core
//!
//! A Rust library for publishing and consuming live media streams over
//! the Real-Time Streaming Protocol, built around one cooperative
//! event loop shared by every connection, timer, and RTP send.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, sender/receiver reports, reordering |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation and parsing |
//! | [RFC 3711](https://tools.ietf.org/html/rfc3711) | SRTP | AES-CTR encryption and HMAC-SHA1 authentication of RTP/RTCP |
//! | [RFC 3830](https://tools.ietf.org/html/rfc3830) | MIKEY | SRTP key exchange carried in SDP `a=key-mgmt` |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  rtsp     — control plane: server, client,    │
//! │             Digest auth, request/response     │
//! ├──────────────────────────────────────────────┤
//! │  session  — MediaSession/MediaSubsession, SDP,│
//! │             session state machine, transport  │
//! ├──────────────────────────────────────────────┤
//! │  mount    — named stream registry             │
//! ├──────────────────────────────────────────────┤
//! │  rtp      — header, sink/source, reordering,  │
//! │             SRTP, MIKEY                       │
//! │  rtcp     — sender/receiver reports, BYE, SDES│
//! │  framed_source — codec-agnostic frame pull    │
//! ├──────────────────────────────────────────────┤
//! │  net      — datagram sockets, groupsock       │
//! │  scheduler — cooperative event loop, timers   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Codec-specific framing (NAL extraction, FU-A fragmentation, and so
//! on) is not part of this crate — callers implement [`framed_source::FramedSource`]
//! for whatever media they produce and hand frames to a [`rtp::MultiFramedRtpSink`].
//!
//! ## Crate layout
//!
//! - [`scheduler`] — the single-threaded event loop.
//! - [`net`] — datagram socket setup, multicast groupsocks.
//! - [`rtp`] — RTP header, sinks/sources, reordering, SRTP, MIKEY (components D-I).
//! - [`rtcp`] — RTCP report/BYE/SDES construction and parsing.
//! - [`framed_source`] — the media-production boundary.
//! - [`session`] — [`session::media_session::MediaSession`]/[`session::media_session::MediaSubsession`],
//!   SDP, and the RTSP session state machine.
//! - [`mount`] — [`mount::MountRegistry`], named stream lookup.
//! - [`rtsp`] — request/response parsing, Digest auth, [`rtsp::RtspServer`],
//!   [`rtsp::RtspClient`] (components K, L).
//! - [`error`] — [`RtspError`] and [`Result`].

pub mod error;
pub mod framed_source;
pub mod mount;
pub mod net;
pub mod rtcp;
pub mod rtp;
pub mod rtsp;
pub mod scheduler;
pub mod session;

pub use error::{Result, RtspError};
pub use framed_source::{ByteStreamSource, ChunkedFrameSource, FramedSource, MediaFrame};
pub use mount::{DEFAULT_MOUNT_PATH, MountRegistry};
pub use rtsp::{RtspClient, RtspServer, ServerConfig};
pub use session::media_session::{MediaSession, MediaSubsession};
