//! Generic RTP fixed header builder and parser (RFC 3550 §5.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Covers both directions: building outbound headers for the sink and
//! parsing inbound ones for the source, including CSRC
//! lists, extension headers, and padding.

use rand::Rng;

pub const HEADER_LEN: usize = 12;

/// Per-stream RTP header state for an outbound sink: owns the sequence
/// counter, timestamp, and SSRC shared by every packet it emits.
#[derive(Debug)]
pub struct RtpHeader {
    pub pt: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with an explicit base sequence and timestamp — used by
    /// sinks that must reproduce a deterministic wire trace in tests.
    pub fn with_base(pt: u8, ssrc: u32, base_seq: u16, base_ts: u32) -> Self {
        Self {
            pt,
            ssrc,
            sequence: base_seq,
            timestamp: base_ts as u64,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    pub fn write(&mut self, marker: bool) -> [u8; HEADER_LEN] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the RTP timestamp by the given increment (e.g. `90000/fps`
    /// for 90 kHz video).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// A parsed inbound RTP packet.
#[derive(Debug, Clone)]
pub struct ParsedRtpPacket<'a> {
    pub version: u8,
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub payload: &'a [u8],
}

/// Parse an RTP packet, skipping the CSRC list and any extension header,
/// and stripping trailing padding indicated by the P-bit and last byte
/// matching RFC 3550's sequence-number rollover rule.
pub fn parse(packet: &[u8]) -> Option<ParsedRtpPacket<'_>> {
    if packet.len() < HEADER_LEN {
        return None;
    }

    let version = packet[0] >> 6;
    let padding = (packet[0] & 0x20) != 0;
    let extension = (packet[0] & 0x10) != 0;
    let cc = (packet[0] & 0x0f) as usize;
    let marker = (packet[1] & 0x80) != 0;
    let payload_type = packet[1] & 0x7f;
    let sequence = u16::from_be_bytes([packet[2], packet[3]]);
    let timestamp = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
    let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);

    let mut offset = HEADER_LEN;
    let mut csrcs = Vec::with_capacity(cc);
    for _ in 0..cc {
        if offset + 4 > packet.len() {
            return None;
        }
        csrcs.push(u32::from_be_bytes([
            packet[offset],
            packet[offset + 1],
            packet[offset + 2],
            packet[offset + 3],
        ]));
        offset += 4;
    }

    if extension {
        if offset + 4 > packet.len() {
            return None;
        }
        let ext_len_words =
            u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]) as usize;
        offset += 4 + ext_len_words * 4;
        if offset > packet.len() {
            return None;
        }
    }

    let mut payload = &packet[offset..];
    if padding {
        let pad_len = *payload.last()? as usize;
        if pad_len == 0 || pad_len > payload.len() {
            return None;
        }
        payload = &payload[..payload.len() - pad_len];
    }

    Some(ParsedRtpPacket {
        version,
        padding,
        marker,
        payload_type,
        sequence,
        timestamp,
        ssrc,
        csrcs,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        let no_marker = h.write(false);
        assert_eq!(no_marker[1] & 0x80, 0);
        let with_marker = h.write(true);
        assert_eq!(with_marker[1] & 0x80, 0x80);
    }

    #[test]
    fn sequence_wraps() {
        let mut h = RtpHeader::with_base(96, 0xAABBCCDD, u16::MAX, 0);
        let buf = h.write(false);
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(seq, u16::MAX);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn wire_trace_matches_explicit_base_sequence_and_timestamp() {
        // PT=96, SSRC=0x11223344, base-seq=1000, base-ts=500000
        let mut h = RtpHeader::with_base(96, 0x1122_3344, 1000, 500_000);
        let buf = h.write(false);
        assert_eq!(
            buf,
            [0x80, 0x60, 0x03, 0xE8, 0x00, 0x07, 0xA1, 0x20, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn parse_roundtrips_simple_packet() {
        let mut h = RtpHeader::with_base(96, 0x1122_3344, 1000, 500_000);
        let hdr = h.write(true);
        let mut packet = hdr.to_vec();
        packet.extend_from_slice(b"payload");
        let parsed = parse(&packet).unwrap();
        assert_eq!(parsed.version, 2);
        assert!(parsed.marker);
        assert_eq!(parsed.sequence, 1000);
        assert_eq!(parsed.timestamp, 500_000);
        assert_eq!(parsed.ssrc, 0x1122_3344);
        assert_eq!(parsed.payload, b"payload");
    }

    #[test]
    fn parse_strips_padding() {
        let mut packet = vec![0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        packet[0] |= 0x20; // P bit
        packet.extend_from_slice(&[1, 2, 3, 3]); // 3 bytes payload + pad_len=3 byte
        let parsed = parse(&packet).unwrap();
        assert_eq!(parsed.payload, &[1]);
    }

    #[test]
    fn parse_rejects_short_packet() {
        assert!(parse(&[0u8; 4]).is_none());
    }
}
