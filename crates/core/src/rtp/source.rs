//! Multi-framed RTP source: depacketizes inbound RTP into
//! frames, reordering packets that arrive out of sequence up to a timed
//! threshold and tracking RFC 3550 §6.4.1 reception statistics.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::rtp::header::{self, ParsedRtpPacket};
use crate::rtp::srtp::SrtpCryptoContext;

/// Default time a packet may sit in the reorder buffer waiting for an
/// earlier-sequenced packet before being delivered anyway.
pub const DEFAULT_REORDER_THRESHOLD: Duration = Duration::from_millis(100);

/// Wrap-aware ordering: `a` is considered to precede `b` if their signed
/// 16-bit difference lies in `(-2^15, 2^15]`, per RFC 1982 serial number
/// arithmetic as applied to RTP sequence numbers.
fn seq_precedes(a: u16, b: u16) -> bool {
    let diff = b.wrapping_sub(a) as i16;
    diff > 0
}

struct Pending {
    arrived_at: Instant,
    packet: OwnedPacket,
}

struct OwnedPacket {
    sequence: u16,
    timestamp: u32,
    marker: bool,
    payload: Vec<u8>,
}

/// Reception statistics mirrored from RFC 3550 §6.4.1, enough to build
/// RTCP Receiver Report blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceptionStats {
    pub packets_received: u64,
    pub packets_expected: u64,
    pub cumulative_lost: i64,
    pub jitter: f64,
    last_transit: Option<i64>,
    highest_seq_ext: u32,
    base_seq: Option<u16>,
}

impl ReceptionStats {
    /// Update statistics for one newly received packet (RFC 3550 §A.8
    /// jitter estimator, applied with a fixed 90kHz-independent transit
    /// unit since the clock rate is caller-supplied via `rtp_timestamp`).
    fn record(&mut self, sequence: u16, rtp_timestamp: u32, arrival_ticks: i64) {
        self.packets_received += 1;

        if self.base_seq.is_none() {
            self.base_seq = Some(sequence);
            self.highest_seq_ext = sequence as u32;
        } else if seq_precedes((self.highest_seq_ext & 0xFFFF) as u16, sequence) {
            if sequence < (self.highest_seq_ext & 0xFFFF) as u16 {
                self.highest_seq_ext = self.highest_seq_ext.wrapping_add(0x1_0000);
            }
            self.highest_seq_ext = (self.highest_seq_ext & 0xFFFF_0000) | sequence as u32;
        }

        let transit = arrival_ticks - rtp_timestamp as i64;
        if let Some(prev) = self.last_transit {
            let d = (transit - prev).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);

        if let Some(base) = self.base_seq {
            self.packets_expected = (self.highest_seq_ext as i64 - base as i64 + 1).max(1) as u64;
            self.cumulative_lost = self.packets_expected as i64 - self.packets_received as i64;
        }
    }
}

/// A depacketized frame ready for the application, with its RTP
/// timestamp and marker bit preserved.
pub struct ReceivedFrame {
    pub data: Vec<u8>,
    pub timestamp: u32,
    pub marker: bool,
}

/// Depacketizes an inbound RTP stream, holding out-of-order packets in a
/// small reorder buffer until either the missing predecessor arrives or
/// [`DEFAULT_REORDER_THRESHOLD`] elapses, at which point it is delivered
/// out of order and the gap is recorded as loss.
pub struct MultiFramedRtpSource {
    srtp: Option<SrtpCryptoContext>,
    reorder_threshold: Duration,
    next_expected: Option<u16>,
    pending: BTreeMap<u16, Pending>,
    stats: ReceptionStats,
}

impl MultiFramedRtpSource {
    pub fn new() -> Self {
        Self {
            srtp: None,
            reorder_threshold: DEFAULT_REORDER_THRESHOLD,
            next_expected: None,
            pending: BTreeMap::new(),
            stats: ReceptionStats::default(),
        }
    }

    pub fn with_srtp(mut self, srtp: SrtpCryptoContext) -> Self {
        self.srtp = Some(srtp);
        self
    }

    pub fn with_reorder_threshold(mut self, threshold: Duration) -> Self {
        self.reorder_threshold = threshold;
        self
    }

    pub fn stats(&self) -> ReceptionStats {
        self.stats
    }

    /// Feed one inbound wire packet. Returns any frames now ready for
    /// delivery, in sequence order (possibly empty, possibly more than
    /// one if this packet fills a gap).
    pub fn handle_packet(&mut self, wire: &[u8], arrival_ticks: i64) -> Result<Vec<ReceivedFrame>> {
        let plaintext = match &mut self.srtp {
            Some(ctx) => ctx.process_incoming_srtp(wire, false)?,
            None => wire.to_vec(),
        };

        let parsed = match header::parse(&plaintext) {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        self.ingest(&parsed, arrival_ticks);

        Ok(self.drain_ready(Instant::now()))
    }

    fn ingest(&mut self, parsed: &ParsedRtpPacket<'_>, arrival_ticks: i64) {
        if let Some(expected) = self.next_expected {
            if seq_precedes(parsed.sequence, expected) {
                // Excessively delayed: already past the point this sequence
                // number would have been accepted. Drop it outright rather
                // than feeding it into the reorder buffer or the stats.
                return;
            }
        }

        self.stats.record(parsed.sequence, parsed.timestamp, arrival_ticks);

        if self.next_expected.is_none() {
            self.next_expected = Some(parsed.sequence);
        }

        self.pending.insert(
            parsed.sequence,
            Pending {
                arrived_at: Instant::now(),
                packet: OwnedPacket {
                    sequence: parsed.sequence,
                    timestamp: parsed.timestamp,
                    marker: parsed.marker,
                    payload: parsed.payload.to_vec(),
                },
            },
        );
    }

    /// Release packets that are either next-in-sequence or have aged past
    /// the reorder threshold, in each case advancing `next_expected` and
    /// treating any skipped sequence numbers as lost.
    fn drain_ready(&mut self, now: Instant) -> Vec<ReceivedFrame> {
        let mut ready = Vec::new();

        loop {
            let Some(expected) = self.next_expected else {
                break;
            };

            if let Some(pending) = self.pending.remove(&expected) {
                ready.push(ReceivedFrame {
                    data: pending.packet.payload,
                    timestamp: pending.packet.timestamp,
                    marker: pending.packet.marker,
                });
                self.next_expected = Some(expected.wrapping_add(1));
                continue;
            }

            // Nothing for `expected` yet — check whether the head of the
            // buffer (lowest buffered sequence number, not the oldest by
            // arrival time) has aged out. If so, jump straight to it: every
            // sequence number in between is lost, not just the one at
            // `expected`.
            let head = self.pending.keys().next().copied();

            match head {
                Some(head_seq) => {
                    let arrived_at = self.pending[&head_seq].arrived_at;
                    if now.duration_since(arrived_at) >= self.reorder_threshold {
                        self.next_expected = Some(head_seq);
                    } else {
                        break;
                    }
                }
                None => break,
            }
        }

        ready
    }

    /// Force-flush any packets still held past the reorder threshold,
    /// called periodically by the owning session even with no new
    /// arrivals (so a stalled stream doesn't wedge the buffer forever).
    pub fn flush_expired(&mut self) -> Vec<ReceivedFrame> {
        self.drain_ready(Instant::now())
    }
}

impl Default for MultiFramedRtpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::header::RtpHeader;

    fn make_packet(ssrc: u32, seq: u16, ts: u32, payload: &[u8]) -> Vec<u8> {
        let mut h = RtpHeader::with_base(96, ssrc, seq, ts);
        let mut packet = h.write(false).to_vec();
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn in_order_packets_deliver_immediately() {
        let mut source = MultiFramedRtpSource::new();
        let p0 = make_packet(1, 0, 0, b"a");
        let p1 = make_packet(1, 1, 100, b"b");

        let frames0 = source.handle_packet(&p0, 1000).unwrap();
        assert_eq!(frames0.len(), 1);
        assert_eq!(frames0[0].data, b"a");

        let frames1 = source.handle_packet(&p1, 1100).unwrap();
        assert_eq!(frames1.len(), 1);
        assert_eq!(frames1[0].data, b"b");
    }

    #[test]
    fn reordered_packet_is_resequenced() {
        let mut source = MultiFramedRtpSource::new();
        let p0 = make_packet(1, 0, 0, b"a");
        let p1 = make_packet(1, 1, 100, b"b");

        source.handle_packet(&p0, 1000).unwrap();
        // p1 arrives, then (out of order) nothing — simulate seq 2 arriving
        // before seq 1 is ever sent, forcing seq 1 through the reorder path.
        let p2 = make_packet(1, 2, 200, b"c");
        let frames = source.handle_packet(&p2, 1200).unwrap();
        assert!(frames.is_empty(), "seq 2 held pending seq 1");

        let frames = source.handle_packet(&p1, 1100).unwrap();
        assert_eq!(frames.len(), 2, "seq 1 then 2 delivered once gap fills");
        assert_eq!(frames[0].data, b"b");
        assert_eq!(frames[1].data, b"c");
    }

    #[test]
    fn stale_gap_is_skipped_after_threshold() {
        let mut source = MultiFramedRtpSource::new().with_reorder_threshold(Duration::from_millis(1));
        let p0 = make_packet(1, 0, 0, b"a");
        source.handle_packet(&p0, 1000).unwrap();

        let p2 = make_packet(1, 2, 200, b"c");
        source.handle_packet(&p2, 1200).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let frames = source.flush_expired();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, b"c", "seq 1 skipped as lost after aging out");
    }

    #[test]
    fn stats_track_loss() {
        let mut source = MultiFramedRtpSource::new().with_reorder_threshold(Duration::from_millis(1));
        let p0 = make_packet(1, 0, 0, b"a");
        source.handle_packet(&p0, 1000).unwrap();
        let p2 = make_packet(1, 2, 200, b"c");
        source.handle_packet(&p2, 1200).unwrap();

        let stats = source.stats();
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_expected, 3);
        assert_eq!(stats.cumulative_lost, 1);
    }

    #[test]
    fn late_arrival_after_gap_timeout_is_discarded() {
        let mut source = MultiFramedRtpSource::new().with_reorder_threshold(Duration::from_millis(1));
        let p100 = make_packet(1, 100, 0, b"a");
        source.handle_packet(&p100, 1000).unwrap();

        let p102 = make_packet(1, 102, 200, b"c");
        source.handle_packet(&p102, 1200).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let frames = source.flush_expired();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, b"c", "101 skipped as lost, 102 delivered");

        let p101 = make_packet(1, 101, 100, b"b");
        let late = source.handle_packet(&p101, 1300).unwrap();
        assert!(late.is_empty(), "101 arrives after next_expected moved past it");

        let stats = source.stats();
        assert_eq!(stats.packets_received, 2, "the late packet must not count as received");
        assert_eq!(stats.cumulative_lost, 1);
    }
}
