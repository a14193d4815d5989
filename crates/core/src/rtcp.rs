//! RTCP: Sender/Receiver Reports, SDES, BYE, and APP
//! packets, with an adaptive reporting interval and RR↔SR correlation
//! (RFC 3550 §6).

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Result, RtspError};
use crate::rtp::ReceptionStats;
use crate::rtp::interface::RtpInterface;
use crate::scheduler::{DelayToken, Scheduler};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const RTCP_VERSION: u8 = 2;
const PT_SR: u8 = 200;
const PT_RR: u8 = 201;
const PT_SDES: u8 = 202;
const PT_BYE: u8 = 203;
const PT_APP: u8 = 204;

const SDES_CNAME: u8 = 1;

/// Minimum interval between RTCP reports, RFC 3550 §6.2.
pub const MIN_RTCP_INTERVAL: Duration = Duration::from_millis(5_000);

/// Fraction of session bandwidth RTCP is allowed to consume.
pub const RTCP_BANDWIDTH_FRACTION: f64 = 0.05;

/// One Sender Report block: sender's own stream statistics at the time
/// of sending.
#[derive(Debug, Clone, Copy)]
pub struct SenderInfo {
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// One Receiver Report block, describing reception quality of a remote
/// SSRC (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    pub fn from_stats(ssrc: u32, stats: &ReceptionStats, last_sr: u32, delay_since_last_sr: u32) -> Self {
        let fraction_lost = if stats.packets_expected == 0 {
            0
        } else {
            ((stats.cumulative_lost.max(0) as f64 / stats.packets_expected as f64) * 256.0) as u8
        };
        Self {
            ssrc,
            fraction_lost,
            cumulative_lost: stats.cumulative_lost.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            highest_seq: 0,
            jitter: stats.jitter as u32,
            last_sr,
            delay_since_last_sr,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        let cumulative = (self.cumulative_lost as u32) & 0x00FF_FFFF;
        out.push(self.fraction_lost);
        out.extend_from_slice(&cumulative.to_be_bytes()[1..]);
        out.extend_from_slice(&self.highest_seq.to_be_bytes());
        out.extend_from_slice(&self.jitter.to_be_bytes());
        out.extend_from_slice(&self.last_sr.to_be_bytes());
        out.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }
}

fn write_rtcp_header(out: &mut Vec<u8>, count: u8, pt: u8, length_words: u16) {
    out.push((RTCP_VERSION << 6) | count);
    out.push(pt);
    out.extend_from_slice(&length_words.to_be_bytes());
}

/// Build a Sender Report packet, optionally followed by report blocks
/// for other SSRCs this participant is receiving (compound with RR data
/// folded into the SR per RFC 3550 §6.4.1).
pub fn build_sender_report(ssrc: u32, info: &SenderInfo, blocks: &[ReportBlock]) -> Vec<u8> {
    let mut out = Vec::new();
    let length_words = (6 + blocks.len() * 6) as u16;
    write_rtcp_header(&mut out, blocks.len() as u8, PT_SR, length_words);
    out.extend_from_slice(&ssrc.to_be_bytes());
    out.extend_from_slice(&info.ntp_seconds.to_be_bytes());
    out.extend_from_slice(&info.ntp_fraction.to_be_bytes());
    out.extend_from_slice(&info.rtp_timestamp.to_be_bytes());
    out.extend_from_slice(&info.packet_count.to_be_bytes());
    out.extend_from_slice(&info.octet_count.to_be_bytes());
    for block in blocks {
        block.write(&mut out);
    }
    out
}

/// Build a Receiver Report packet (no sender info, receiver-only
/// participant).
pub fn build_receiver_report(ssrc: u32, blocks: &[ReportBlock]) -> Vec<u8> {
    let mut out = Vec::new();
    let length_words = (1 + blocks.len() * 6) as u16;
    write_rtcp_header(&mut out, blocks.len() as u8, PT_RR, length_words);
    out.extend_from_slice(&ssrc.to_be_bytes());
    for block in blocks {
        block.write(&mut out);
    }
    out
}

/// Build an SDES packet with a single CNAME chunk.
pub fn build_sdes(ssrc: u32, cname: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut body = Vec::new();
    body.extend_from_slice(&ssrc.to_be_bytes());
    body.push(SDES_CNAME);
    body.push(cname.len() as u8);
    body.extend_from_slice(cname.as_bytes());
    body.push(0); // terminating null item
    while body.len() % 4 != 0 {
        body.push(0);
    }

    let length_words = (body.len() / 4) as u16;
    write_rtcp_header(&mut out, 1, PT_SDES, length_words);
    out.extend_from_slice(&body);
    out
}

/// Build a BYE packet with an optional reason string (RFC 3550 §6.6).
pub fn build_bye(ssrcs: &[u32], reason: Option<&str>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut body = Vec::new();
    for ssrc in ssrcs {
        body.extend_from_slice(&ssrc.to_be_bytes());
    }
    if let Some(reason) = reason {
        body.push(reason.len().min(255) as u8);
        body.extend_from_slice(&reason.as_bytes()[..reason.len().min(255)]);
        while body.len() % 4 != 0 {
            body.push(0);
        }
    }
    let length_words = (body.len() / 4) as u16;
    write_rtcp_header(&mut out, ssrcs.len() as u8, PT_BYE, length_words);
    out.extend_from_slice(&body);
    out
}

/// Build an application-defined (APP) packet (RFC 3550 §6.7).
pub fn build_app(ssrc: u32, name: [u8; 4], subtype: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut body = Vec::new();
    body.extend_from_slice(&ssrc.to_be_bytes());
    body.extend_from_slice(&name);
    body.extend_from_slice(data);
    while body.len() % 4 != 0 {
        body.push(0);
    }
    let length_words = (body.len() / 4) as u16;
    write_rtcp_header(&mut out, subtype, PT_APP, length_words);
    out.extend_from_slice(&body);
    out
}

/// One decoded RTCP packet within a compound datagram.
#[derive(Debug, Clone)]
pub enum RtcpPacket {
    SenderReport { ssrc: u32, blocks: Vec<ReportBlock> },
    ReceiverReport { ssrc: u32, blocks: Vec<ReportBlock> },
    SourceDescription { chunks: Vec<(u32, String)> },
    Bye { ssrcs: Vec<u32>, reason: Option<String> },
    App { ssrc: u32, name: [u8; 4], subtype: u8, data: Vec<u8> },
}

fn parse_report_blocks(body: &[u8], count: u8) -> Option<Vec<ReportBlock>> {
    let mut blocks = Vec::with_capacity(count as usize);
    let mut offset = 0;
    for _ in 0..count {
        if offset + 24 > body.len() {
            return None;
        }
        let ssrc = u32::from_be_bytes(body[offset..offset + 4].try_into().ok()?);
        let fraction_lost = body[offset + 4];
        let cumulative_lost = i32::from_be_bytes([0, body[offset + 5], body[offset + 6], body[offset + 7]])
            << 8
            >> 8;
        let highest_seq = u32::from_be_bytes(body[offset + 8..offset + 12].try_into().ok()?);
        let jitter = u32::from_be_bytes(body[offset + 12..offset + 16].try_into().ok()?);
        let last_sr = u32::from_be_bytes(body[offset + 16..offset + 20].try_into().ok()?);
        let delay_since_last_sr = u32::from_be_bytes(body[offset + 20..offset + 24].try_into().ok()?);
        blocks.push(ReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost,
            highest_seq,
            jitter,
            last_sr,
            delay_since_last_sr,
        });
        offset += 24;
    }
    Some(blocks)
}

/// Parse every RTCP packet in a compound datagram (RFC 3550 §6.1
/// mandates at least an SR/RR followed by an SDES; unknown payload
/// types are skipped rather than rejecting the whole compound packet).
pub fn parse_compound(mut data: &[u8]) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();

    while data.len() >= 4 {
        let version = data[0] >> 6;
        if version != RTCP_VERSION {
            return Err(RtspError::SdpParse("unsupported RTCP version".into()));
        }
        let count = data[0] & 0x1f;
        let pt = data[1];
        let length_words = u16::from_be_bytes([data[2], data[3]]) as usize;
        let packet_len = (length_words + 1) * 4;
        if packet_len > data.len() {
            return Err(RtspError::SdpParse("truncated RTCP packet".into()));
        }
        let body = &data[4..packet_len];

        match pt {
            PT_SR if body.len() >= 20 => {
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let blocks = parse_report_blocks(&body[20..], count).unwrap_or_default();
                packets.push(RtcpPacket::SenderReport { ssrc, blocks });
            }
            PT_RR if body.len() >= 4 => {
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let blocks = parse_report_blocks(&body[4..], count).unwrap_or_default();
                packets.push(RtcpPacket::ReceiverReport { ssrc, blocks });
            }
            PT_SDES => {
                packets.push(RtcpPacket::SourceDescription {
                    chunks: parse_sdes_chunks(body, count),
                });
            }
            PT_BYE if body.len() >= count as usize * 4 => {
                let mut ssrcs = Vec::with_capacity(count as usize);
                for i in 0..count as usize {
                    ssrcs.push(u32::from_be_bytes(
                        body[i * 4..i * 4 + 4].try_into().unwrap(),
                    ));
                }
                let reason = body
                    .get(count as usize * 4)
                    .copied()
                    .and_then(|len| body.get(count as usize * 4 + 1..count as usize * 4 + 1 + len as usize))
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
                packets.push(RtcpPacket::Bye { ssrcs, reason });
            }
            PT_APP if body.len() >= 8 => {
                let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let name = [body[4], body[5], body[6], body[7]];
                packets.push(RtcpPacket::App {
                    ssrc,
                    name,
                    subtype: count,
                    data: body[8..].to_vec(),
                });
            }
            _ => {}
        }

        data = &data[packet_len..];
    }

    Ok(packets)
}

fn parse_sdes_chunks(body: &[u8], count: u8) -> Vec<(u32, String)> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    for _ in 0..count {
        if offset + 4 > body.len() {
            break;
        }
        let ssrc = u32::from_be_bytes([
            body[offset],
            body[offset + 1],
            body[offset + 2],
            body[offset + 3],
        ]);
        offset += 4;
        let mut cname = String::new();
        while offset < body.len() {
            let item_type = body[offset];
            if item_type == 0 {
                offset += 1;
                break;
            }
            let len = *body.get(offset + 1).unwrap_or(&0) as usize;
            if item_type == SDES_CNAME {
                if let Some(bytes) = body.get(offset + 2..offset + 2 + len) {
                    cname = String::from_utf8_lossy(bytes).into_owned();
                }
            }
            offset += 2 + len;
        }
        while offset % 4 != 0 {
            offset += 1;
        }
        chunks.push((ssrc, cname));
    }
    chunks
}

/// Compute the next reporting interval using the RFC 3550 §6.3 adaptive
/// algorithm, randomized uniformly in `[0.5, 1.5] * interval` to avoid
/// synchronization across participants.
pub fn next_report_interval(members: usize, avg_rtcp_size: usize, bandwidth_bps: f64, is_sender: bool) -> Duration {
    let rtcp_bw = bandwidth_bps * RTCP_BANDWIDTH_FRACTION;
    let senders_fraction = if is_sender { 1.0 } else { 0.75 };
    let effective_members = (members.max(1) as f64) * senders_fraction;
    let base = (avg_rtcp_size as f64 * effective_members / rtcp_bw.max(1.0)).max(MIN_RTCP_INTERVAL.as_secs_f64());

    let mut rng = rand::rng();
    let factor: f64 = rng.random_range(0.5..=1.5);
    Duration::from_secs_f64(base * factor)
}

/// Wall-clock time as an NTP (seconds, fraction) pair for a Sender
/// Report's `NTP timestamp` field (RFC 3550 §4).
pub fn current_ntp_timestamp() -> (u32, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = now.as_secs() + NTP_UNIX_OFFSET;
    let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (seconds as u32, fraction as u32)
}

/// The middle 32 bits of a 64-bit NTP timestamp, as carried in a Receiver
/// Report's `last SR` field (RFC 3550 §6.4.1).
fn compact_ntp(seconds: u32, fraction: u32) -> u32 {
    (seconds << 16) | (fraction >> 16)
}

struct SentReport {
    compact_ntp: u32,
    sent_at: Instant,
}

type ByeCallback = Box<dyn FnMut(Option<String>) + Send>;

/// Per-subsession RTCP participant: sends compound SR+SDES reports on the
/// adaptive interval (RFC 3550 §6.3), correlates inbound RR blocks back to
/// the SR they answer, and dispatches a callback when the peer sends BYE.
pub struct RtcpInstance {
    ssrc: u32,
    cname: String,
    interface: RtpInterface,
    sent_reports: Mutex<Vec<SentReport>>,
    last_round_trip: Mutex<Option<Duration>>,
    token: Mutex<Option<DelayToken>>,
    bye_callback: Mutex<Option<ByeCallback>>,
}

impl RtcpInstance {
    pub fn new(ssrc: u32, cname: impl Into<String>, interface: RtpInterface) -> Arc<Self> {
        Arc::new(Self {
            ssrc,
            cname: cname.into(),
            interface,
            sent_reports: Mutex::new(Vec::new()),
            last_round_trip: Mutex::new(None),
            token: Mutex::new(None),
            bye_callback: Mutex::new(None),
        })
    }

    /// Register a callback fired every time an inbound compound packet
    /// carries a BYE, with whatever reason string (if any) it names.
    pub fn on_bye(&self, callback: impl FnMut(Option<String>) + Send + 'static) {
        *self.bye_callback.lock() = Some(Box::new(callback));
    }

    /// Most recently measured round trip to the peer, derived from an RR's
    /// `last SR`/`delay since last SR` fields, or `None` before the first
    /// correlated RR arrives.
    pub fn last_round_trip(&self) -> Option<Duration> {
        *self.last_round_trip.lock()
    }

    /// Begin sending periodic sender reports, pulling fresh stream stats
    /// from `stats_fn` each time one is due.
    pub fn start(
        self: &Arc<Self>,
        scheduler: &mut Scheduler,
        stats_fn: Arc<dyn Fn() -> SenderInfo + Send + Sync>,
    ) {
        Self::schedule_report(self.clone(), stats_fn, scheduler, Duration::ZERO);
    }

    /// Cancel the pending report and send a BYE for this participant.
    pub fn stop(&self, scheduler: &mut Scheduler, reason: Option<&str>) {
        if let Some(token) = self.token.lock().take() {
            scheduler.unschedule(token);
        }
        let bye = build_bye(&[self.ssrc], reason);
        if let Err(e) = self.interface.send(&bye) {
            tracing::warn!(error = %e, "failed to send RTCP BYE");
        }
    }

    fn schedule_report(
        this: Arc<Self>,
        stats_fn: Arc<dyn Fn() -> SenderInfo + Send + Sync>,
        scheduler: &mut Scheduler,
        delay: Duration,
    ) {
        let this_for_token = this.clone();
        let token = scheduler.schedule_delayed(delay, move |sched| {
            this.send_report(&stats_fn);
            this.poll_incoming();
            let next = next_report_interval(2, 200, 64_000.0, true);
            Self::schedule_report(this, stats_fn, sched, next);
        });
        *this_for_token.token.lock() = Some(token);
    }

    fn send_report(&self, stats_fn: &Arc<dyn Fn() -> SenderInfo + Send + Sync>) {
        let info = stats_fn();
        let mut compound = build_sender_report(self.ssrc, &info, &[]);
        compound.extend(build_sdes(self.ssrc, &self.cname));
        if let Err(e) = self.interface.send(&compound) {
            tracing::warn!(error = %e, "failed to send RTCP report");
            return;
        }
        self.sent_reports.lock().push(SentReport {
            compact_ntp: compact_ntp(info.ntp_seconds, info.ntp_fraction),
            sent_at: Instant::now(),
        });
    }

    fn poll_incoming(&self) {
        if let Some(data) = self.interface.take_inbound() {
            self.handle_incoming(&data);
        }
    }

    /// Process one compound RTCP datagram from the peer: correlate any RR
    /// blocks naming an SR this instance sent, and dispatch the BYE
    /// callback for a BYE packet.
    pub fn handle_incoming(&self, data: &[u8]) {
        let packets = match parse_compound(data) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed RTCP packet");
                return;
            }
        };
        for packet in packets {
            match packet {
                RtcpPacket::ReceiverReport { blocks, .. } | RtcpPacket::SenderReport { blocks, .. } => {
                    for block in blocks {
                        if block.last_sr != 0 {
                            self.correlate_round_trip(block.last_sr, block.delay_since_last_sr);
                        }
                    }
                }
                RtcpPacket::Bye { reason, .. } => {
                    if let Some(cb) = self.bye_callback.lock().as_mut() {
                        cb(reason);
                    }
                }
                _ => {}
            }
        }
    }

    fn correlate_round_trip(&self, last_sr: u32, delay_since_last_sr: u32) {
        let round_trip = {
            let sent = self.sent_reports.lock();
            let Some(entry) = sent.iter().rev().find(|s| s.compact_ntp == last_sr) else {
                return;
            };
            let delay = Duration::from_secs_f64(delay_since_last_sr as f64 / 65536.0);
            entry.sent_at.elapsed().saturating_sub(delay)
        };
        *self.last_round_trip.lock() = Some(round_trip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_report_roundtrip() {
        let info = SenderInfo {
            ntp_seconds: 1000,
            ntp_fraction: 2000,
            rtp_timestamp: 90000,
            packet_count: 5,
            octet_count: 700,
        };
        let block = ReportBlock {
            ssrc: 0xAABB,
            fraction_lost: 1,
            cumulative_lost: 2,
            highest_seq: 105,
            jitter: 10,
            last_sr: 12345,
            delay_since_last_sr: 6789,
        };
        let packet = build_sender_report(0x1234, &info, &[block]);
        let parsed = parse_compound(&packet).unwrap();
        assert_eq!(parsed.len(), 1);
        match &parsed[0] {
            RtcpPacket::SenderReport { ssrc, blocks } => {
                assert_eq!(*ssrc, 0x1234);
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].ssrc, 0xAABB);
                assert_eq!(blocks[0].highest_seq, 105);
            }
            other => panic!("expected SenderReport, got {other:?}"),
        }
    }

    #[test]
    fn compound_sr_plus_sdes_plus_bye() {
        let info = SenderInfo {
            ntp_seconds: 0,
            ntp_fraction: 0,
            rtp_timestamp: 0,
            packet_count: 0,
            octet_count: 0,
        };
        let mut compound = build_sender_report(1, &info, &[]);
        compound.extend(build_sdes(1, "user@host"));
        compound.extend(build_bye(&[1], Some("done")));

        let parsed = parse_compound(&compound).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(matches!(parsed[0], RtcpPacket::SenderReport { .. }));
        assert!(matches!(parsed[1], RtcpPacket::SourceDescription { .. }));
        assert!(matches!(parsed[2], RtcpPacket::Bye { .. }));
    }

    #[test]
    fn bye_reason_roundtrips() {
        let packet = build_bye(&[42], Some("teardown requested"));
        let parsed = parse_compound(&packet).unwrap();
        match &parsed[0] {
            RtcpPacket::Bye { ssrcs, reason } => {
                assert_eq!(ssrcs, &[42]);
                assert_eq!(reason.as_deref(), Some("teardown requested"));
            }
            other => panic!("expected Bye, got {other:?}"),
        }
    }

    #[test]
    fn app_packet_roundtrips() {
        let packet = build_app(7, *b"TEST", 3, b"payload-data");
        let parsed = parse_compound(&packet).unwrap();
        match &parsed[0] {
            RtcpPacket::App { ssrc, name, subtype, data } => {
                assert_eq!(*ssrc, 7);
                assert_eq!(name, b"TEST");
                assert_eq!(*subtype, 3);
                assert_eq!(&data[..12], b"payload-data");
            }
            other => panic!("expected App, got {other:?}"),
        }
    }

    #[test]
    fn report_interval_is_randomized_within_bounds() {
        let base_only = next_report_interval(1, 200, 64_000.0, true);
        assert!(base_only >= MIN_RTCP_INTERVAL.mul_f64(0.5));
    }

    fn loopback_interface() -> (RtpInterface, std::net::UdpSocket) {
        use crate::net::GroupSocket;
        let recv = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let recv_addr = recv.local_addr().unwrap();
        let gs = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        gs.add_destination(
            crate::net::GroupEndpointId::new(recv_addr.ip(), recv_addr.port(), 1),
            0,
        );
        (RtpInterface::datagram(Arc::new(gs)), recv)
    }

    #[test]
    fn start_sends_sender_report_immediately() {
        let (iface, recv) = loopback_interface();
        let instance = RtcpInstance::new(0xABCD, "user@host", iface);
        let mut scheduler = Scheduler::new().unwrap();
        let stats: Arc<dyn Fn() -> SenderInfo + Send + Sync> = Arc::new(|| SenderInfo {
            ntp_seconds: 1,
            ntp_fraction: 0,
            rtp_timestamp: 90_000,
            packet_count: 10,
            octet_count: 1_000,
        });
        instance.start(&mut scheduler, stats);
        scheduler.single_step(Duration::from_millis(20)).unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = recv.recv_from(&mut buf).unwrap();
        let parsed = parse_compound(&buf[..n]).unwrap();
        assert!(matches!(parsed[0], RtcpPacket::SenderReport { ssrc: 0xABCD, .. }));
        assert!(matches!(parsed[1], RtcpPacket::SourceDescription { .. }));
    }

    #[test]
    fn bye_callback_fires_on_inbound_bye() {
        let (iface, _recv) = loopback_interface();
        let instance = RtcpInstance::new(1, "user@host", iface);
        let seen_reason = Arc::new(Mutex::new(None));
        let seen = seen_reason.clone();
        instance.on_bye(move |reason| *seen.lock() = reason);

        let bye = build_bye(&[1], Some("session ended"));
        instance.handle_incoming(&bye);

        assert_eq!(seen_reason.lock().as_deref(), Some("session ended"));
    }

    #[test]
    fn round_trip_correlates_matching_sr() {
        let (iface, _recv) = loopback_interface();
        let instance = RtcpInstance::new(1, "user@host", iface);
        let info = SenderInfo {
            ntp_seconds: 100,
            ntp_fraction: 0,
            rtp_timestamp: 0,
            packet_count: 1,
            octet_count: 1,
        };
        instance.send_report(&(Arc::new(move || info) as Arc<dyn Fn() -> SenderInfo + Send + Sync>));

        let last_sr = compact_ntp(info.ntp_seconds, info.ntp_fraction);
        let rr = build_receiver_report(
            2,
            &[ReportBlock {
                ssrc: 1,
                fraction_lost: 0,
                cumulative_lost: 0,
                highest_seq: 0,
                jitter: 0,
                last_sr,
                delay_since_last_sr: 0,
            }],
        );
        instance.handle_incoming(&rr);

        assert!(instance.last_round_trip().is_some());
    }
}
