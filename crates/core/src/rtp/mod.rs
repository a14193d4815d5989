//! RTP session engine: packetization/depacketization, reordering,
//! SRTP/MIKEY, and the datagram/interleaved transport abstraction
//! (components D through I).

pub mod header;
pub mod interface;
pub mod mikey;
pub mod packet_buffer;
pub mod sink;
pub mod source;
pub mod srtp;

pub use header::{ParsedRtpPacket, RtpHeader};
pub use interface::RtpInterface;
pub use sink::{Frame, MultiFramedRtpSink};
pub use source::{MultiFramedRtpSource, ReceivedFrame, ReceptionStats};
pub use srtp::SrtpCryptoContext;
