//! Multi-framed RTP sink: packetizes frames from a
//! [`crate::framed_source::FramedSource`] into RTP packets, applying
//! SRTP when configured, and schedules the next send via the owning
//! [`crate::scheduler::Scheduler`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::framed_source::FramedSource;
use crate::rtp::header::RtpHeader;
use crate::rtp::interface::RtpInterface;
use crate::rtp::packet_buffer::{PacketBuffer, PREFERRED_PACKET_SIZE};
use crate::rtp::srtp::SrtpCryptoContext;
use crate::scheduler::{DelayToken, Scheduler};

type AfterPlayingCallback = Box<dyn FnOnce() + Send>;

/// One frame handed up from a [`crate::framed_source::FramedSource`]:
/// payload bytes plus whether it completes an RTP marker-bit boundary
/// (e.g. the last slice of a video frame).
pub struct Frame {
    pub data: Vec<u8>,
    pub marker: bool,
    pub timestamp_increment: u32,
}

/// Packetizes frames into RTP packets and writes them to an
/// [`RtpInterface`]. Codec-agnostic: framing is the caller's
/// responsibility via [`Frame`], this just chunks and headers it.
pub struct MultiFramedRtpSink {
    header: RtpHeader,
    interface: RtpInterface,
    buffer: PacketBuffer,
    srtp: Option<Arc<Mutex<SrtpCryptoContext>>>,
    packets_sent: u64,
    octets_sent: u64,
    playing_token: Option<DelayToken>,
}

impl MultiFramedRtpSink {
    pub fn new(pt: u8, ssrc: u32, interface: RtpInterface) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            interface,
            buffer: PacketBuffer::new(PREFERRED_PACKET_SIZE),
            srtp: None,
            packets_sent: 0,
            octets_sent: 0,
            playing_token: None,
        }
    }

    pub fn with_srtp(mut self, srtp: Arc<Mutex<SrtpCryptoContext>>) -> Self {
        self.srtp = Some(srtp);
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn octets_sent(&self) -> u64 {
        self.octets_sent
    }

    /// Sequence number the *next* emitted packet will carry — the value
    /// needed for a `RTP-Info: seq=` header at PLAY time (RFC 2326 §12.33).
    pub fn current_sequence(&self) -> u16 {
        self.header.sequence()
    }

    /// RTP timestamp of the most recently advanced frame, for `RTP-Info:
    /// rtptime=`.
    pub fn current_timestamp(&self) -> u32 {
        self.header.timestamp() as u32
    }

    /// Packetize and send one frame, splitting across multiple RTP
    /// packets if it exceeds the preferred packet size.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.header.advance_timestamp(frame.timestamp_increment);

        let mut offset = 0;
        while offset < frame.data.len() || (frame.data.is_empty() && offset == 0) {
            self.buffer.reset_for_new_packet();
            let chunk_end = (offset + self.buffer.remaining()).min(frame.data.len());
            let chunk = &frame.data[offset..chunk_end];
            self.buffer.append(chunk);
            offset = chunk_end;

            let is_last_chunk = offset >= frame.data.len();
            let marker = frame.marker && is_last_chunk;
            self.emit_packet(marker)?;

            if frame.data.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn emit_packet(&mut self, marker: bool) -> Result<()> {
        let header_bytes = self.header.write(marker);
        let mut packet = Vec::with_capacity(header_bytes.len() + self.buffer.len());
        packet.extend_from_slice(&header_bytes);
        packet.extend_from_slice(self.buffer.bytes());

        let wire_packet = match &self.srtp {
            Some(ctx) => ctx.lock().process_outgoing_srtp(&packet)?,
            None => packet,
        };

        self.interface.send(&wire_packet)?;
        self.packets_sent += 1;
        self.octets_sent += wire_packet.len() as u64;
        Ok(())
    }

    /// Interval until the next packet should be sent for a constant
    /// bitrate/frame-rate source, given frames-per-second. Callers use
    /// this with `Scheduler::reschedule_delayed` to drive a continuous
    /// send loop.
    pub fn next_send_interval(fps: f64) -> Duration {
        Duration::from_secs_f64(1.0 / fps.max(1.0))
    }

    /// Start pulling frames from `source` at `fps`, scheduling each
    /// `send_frame` call on `scheduler` rather than requiring the caller to
    /// drive it. Calls `after_playing` once, from within the scheduler,
    /// when `source` reaches end-of-stream or errors.
    pub fn start_playing(
        sink: &Arc<Mutex<Self>>,
        scheduler: &mut Scheduler,
        source: Arc<Mutex<dyn FramedSource>>,
        fps: f64,
        after_playing: impl FnOnce() + Send + 'static,
    ) {
        let after_playing = Arc::new(Mutex::new(Some(Box::new(after_playing) as AfterPlayingCallback)));
        Self::schedule_next_frame(sink.clone(), source, fps, after_playing, scheduler, Duration::ZERO);
    }

    /// Cancel a pending `start_playing` send, if one is scheduled.
    /// `after_playing` is not invoked.
    pub fn stop_playing(sink: &Arc<Mutex<Self>>, scheduler: &mut Scheduler) {
        let token = sink.lock().playing_token.take();
        if let Some(token) = token {
            scheduler.unschedule(token);
        }
    }

    fn schedule_next_frame(
        sink: Arc<Mutex<Self>>,
        source: Arc<Mutex<dyn FramedSource>>,
        fps: f64,
        after_playing: Arc<Mutex<Option<AfterPlayingCallback>>>,
        scheduler: &mut Scheduler,
        delay: Duration,
    ) {
        let token = scheduler.schedule_delayed(delay, move |sched| {
            let next = source.lock().next_frame();
            match next {
                Ok(Some(media_frame)) => {
                    let frame = Frame {
                        data: media_frame.data,
                        marker: media_frame.marker,
                        timestamp_increment: media_frame.timestamp_increment,
                    };
                    if let Err(e) = sink.lock().send_frame(&frame) {
                        tracing::warn!(error = %e, "start_playing: send_frame failed");
                    }
                    Self::schedule_next_frame(
                        sink,
                        source,
                        fps,
                        after_playing,
                        sched,
                        Self::next_send_interval(fps),
                    );
                }
                Ok(None) => {
                    sink.lock().playing_token = None;
                    if let Some(cb) = after_playing.lock().take() {
                        cb();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "start_playing: frame source failed");
                    sink.lock().playing_token = None;
                    if let Some(cb) = after_playing.lock().take() {
                        cb();
                    }
                }
            }
        });
        sink.lock().playing_token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::GroupSocket;
    use std::net::{SocketAddr, UdpSocket};

    fn loopback_interface() -> (RtpInterface, UdpSocket) {
        let recv = UdpSocket::bind("127.0.0.1:0").unwrap();
        let recv_addr = recv.local_addr().unwrap();
        let gs = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        gs.add_destination(
            crate::net::GroupEndpointId::new(recv_addr.ip(), recv_addr.port(), 1),
            0,
        );
        (RtpInterface::datagram(Arc::new(gs)), recv)
    }

    #[test]
    fn single_frame_produces_one_packet_with_marker() {
        let (iface, recv) = loopback_interface();
        let mut sink = MultiFramedRtpSink::new(96, 0x1000, iface);
        sink.send_frame(&Frame {
            data: b"small payload".to_vec(),
            marker: true,
            timestamp_increment: 3000,
        })
        .unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = recv.recv_from(&mut buf).unwrap();
        assert_eq!(buf[1] & 0x80, 0x80, "marker bit set on sole fragment");
        assert_eq!(sink.packets_sent(), 1);
        assert!(n > 12);
    }

    #[test]
    fn oversized_frame_splits_across_packets() {
        let (iface, recv) = loopback_interface();
        let mut sink = MultiFramedRtpSink::new(96, 0x1000, iface);
        let big = vec![7u8; PREFERRED_PACKET_SIZE * 2 + 10];
        sink.send_frame(&Frame {
            data: big,
            marker: true,
            timestamp_increment: 3000,
        })
        .unwrap();

        assert!(sink.packets_sent() >= 3);
        for _ in 0..sink.packets_sent() {
            let mut buf = [0u8; 2048];
            recv.recv_from(&mut buf).unwrap();
        }
    }

    struct FixedFrames {
        remaining: Vec<Vec<u8>>,
    }

    impl crate::framed_source::FramedSource for FixedFrames {
        fn next_frame(&mut self) -> Result<Option<crate::framed_source::MediaFrame>> {
            if self.remaining.is_empty() {
                return Ok(None);
            }
            let data = self.remaining.remove(0);
            Ok(Some(crate::framed_source::MediaFrame {
                data,
                marker: true,
                timestamp_increment: 3000,
            }))
        }
    }

    #[test]
    fn start_playing_pulls_frames_until_source_ends() {
        let (iface, recv) = loopback_interface();
        let sink = Arc::new(Mutex::new(MultiFramedRtpSink::new(96, 0x1000, iface)));
        let source: Arc<Mutex<dyn crate::framed_source::FramedSource>> =
            Arc::new(Mutex::new(FixedFrames {
                remaining: vec![b"one".to_vec(), b"two".to_vec()],
            }));

        let mut scheduler = crate::scheduler::Scheduler::new().unwrap();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done_cb = done.clone();

        MultiFramedRtpSink::start_playing(&sink, &mut scheduler, source, 30.0, move || {
            done_cb.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        for _ in 0..3 {
            scheduler.single_step(Duration::from_millis(50)).unwrap();
        }

        assert!(
            done.load(std::sync::atomic::Ordering::SeqCst),
            "after_playing should fire once the fixed source is exhausted"
        );
        assert_eq!(sink.lock().packets_sent(), 2);

        for _ in 0..2 {
            let mut buf = [0u8; 2048];
            recv.recv_from(&mut buf).unwrap();
        }
    }

    #[test]
    fn stop_playing_cancels_pending_send() {
        let (iface, _recv) = loopback_interface();
        let sink = Arc::new(Mutex::new(MultiFramedRtpSink::new(96, 0x1000, iface)));
        let source: Arc<Mutex<dyn crate::framed_source::FramedSource>> =
            Arc::new(Mutex::new(FixedFrames {
                remaining: vec![b"one".to_vec()],
            }));

        let mut scheduler = crate::scheduler::Scheduler::new().unwrap();
        MultiFramedRtpSink::start_playing(&sink, &mut scheduler, source, 1.0, || {});
        MultiFramedRtpSink::stop_playing(&sink, &mut scheduler);

        scheduler.single_step(Duration::from_millis(5)).unwrap();
        assert_eq!(sink.lock().packets_sent(), 0);
    }
}
