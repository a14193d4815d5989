//! Media session / subsession: the server-side description
//! of one publishable stream and its per-track state, keyed by
//! `a=control` suffix.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::rtcp::{self, RtcpInstance, SenderInfo};
use crate::rtp::interface::RtpInterface;
use crate::rtp::srtp::SrtpCryptoContext;
use crate::rtp::MultiFramedRtpSink;
use crate::scheduler::Scheduler;
use crate::session::sdp::MediaDescription;

/// One track within a media session: its codec parameters, control
/// suffix, and the sink that packetizes frames for it once a client has
/// SETUP this track.
pub struct MediaSubsession {
    pub control_suffix: String,
    pub payload_type: u8,
    pub rtpmap: String,
    pub fmtp: Option<String>,
    pub ssrc: u32,
    sink: Mutex<Option<MultiFramedRtpSink>>,
    srtp: Mutex<Option<Arc<Mutex<SrtpCryptoContext>>>>,
    rtcp: Mutex<Option<Arc<RtcpInstance>>>,
}

impl MediaSubsession {
    pub fn new(control_suffix: impl Into<String>, payload_type: u8, rtpmap: impl Into<String>) -> Self {
        let ssrc = rand::random::<u32>();
        Self {
            control_suffix: control_suffix.into(),
            payload_type,
            rtpmap: rtpmap.into(),
            fmtp: None,
            ssrc,
            sink: Mutex::new(None),
            srtp: Mutex::new(None),
            rtcp: Mutex::new(None),
        }
    }

    pub fn with_fmtp(mut self, fmtp: impl Into<String>) -> Self {
        self.fmtp = Some(fmtp.into());
        self
    }

    pub fn to_sdp_media(&self) -> MediaDescription {
        MediaDescription {
            media_type: "video".to_string(),
            payload_type: self.payload_type,
            rtpmap: Some(self.rtpmap.clone()),
            fmtp: self.fmtp.clone(),
            control: self.control_suffix.clone(),
            key_mgmt: None,
        }
    }

    /// Install the sink created for this track during SETUP; replaces
    /// any prior sink (re-SETUP after TEARDOWN).
    pub fn install_sink(&self, sink: MultiFramedRtpSink) {
        *self.sink.lock() = Some(sink);
    }

    pub fn install_srtp(&self, ctx: Arc<Mutex<SrtpCryptoContext>>) {
        *self.srtp.lock() = Some(ctx);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn has_rtcp(&self) -> bool {
        self.rtcp.lock().is_some()
    }

    pub fn srtp_context(&self) -> Option<Arc<Mutex<SrtpCryptoContext>>> {
        self.srtp.lock().clone()
    }

    /// Send one frame through this track's sink, if SETUP has installed
    /// one. Silently a no-op otherwise (pre-SETUP sends are a caller
    /// bug, not a protocol error).
    pub fn send_frame(&self, frame: &crate::rtp::Frame) -> crate::error::Result<()> {
        if let Some(sink) = self.sink.lock().as_mut() {
            sink.send_frame(frame)?;
        }
        Ok(())
    }

    /// Values for the `RTP-Info` header's `seq=`/`rtptime=` parameters,
    /// read from the live sink if SETUP has occurred.
    pub fn rtp_info(&self) -> Option<(u16, u32)> {
        let sink = self.sink.lock();
        sink.as_ref()
            .map(|s| (s.current_sequence(), s.current_timestamp()))
    }

    /// Start periodic RTCP reporting for this track over `interface`,
    /// pulling send-side stats from the SETUP-installed sink. Replaces any
    /// RTCP participant from a prior SETUP on this subsession.
    pub fn initiate_rtcp(
        self: &Arc<Self>,
        scheduler: &mut Scheduler,
        interface: RtpInterface,
        cname: impl Into<String>,
    ) -> Arc<RtcpInstance> {
        let instance = RtcpInstance::new(self.ssrc, cname, interface);
        *self.rtcp.lock() = Some(instance.clone());

        let sink_stats = self.sink_stats_fn();
        instance.start(scheduler, sink_stats);
        instance
    }

    fn sink_stats_fn(self: &Arc<Self>) -> Arc<dyn Fn() -> SenderInfo + Send + Sync> {
        let subsession = self.clone();
        Arc::new(move || {
            let (ntp_seconds, ntp_fraction) = rtcp::current_ntp_timestamp();
            let sink = subsession.sink.lock();
            let sink = sink.as_ref();
            SenderInfo {
                ntp_seconds,
                ntp_fraction,
                rtp_timestamp: sink.map(|s| s.current_timestamp()).unwrap_or(0),
                packet_count: sink.map(|s| s.packets_sent() as u32).unwrap_or(0),
                octet_count: sink.map(|s| s.octets_sent() as u32).unwrap_or(0),
            }
        })
    }

    /// Register a callback fired when the peer sends a BYE for this
    /// track's RTCP participant. A no-op if RTCP has not been initiated.
    pub fn on_peer_bye(&self, callback: impl FnMut(Option<String>) + Send + 'static) {
        if let Some(rtcp) = self.rtcp.lock().as_ref() {
            rtcp.on_bye(callback);
        }
    }

    /// Most recent RTCP-measured round trip to the peer, if RTCP is
    /// active and has seen at least one correlated RR.
    pub fn rtcp_round_trip(&self) -> Option<Duration> {
        self.rtcp.lock().as_ref().and_then(|r| r.last_round_trip())
    }

    /// Stop RTCP reporting and send a final BYE, e.g. on TEARDOWN.
    pub fn stop_rtcp(&self, scheduler: &mut Scheduler, reason: Option<&str>) {
        if let Some(rtcp) = self.rtcp.lock().take() {
            rtcp.stop(scheduler, reason);
        }
    }
}

/// A publishable stream: a stream name plus its tracks, each a
/// [`MediaSubsession`].
pub struct MediaSession {
    pub stream_name: String,
    pub session_name: String,
    pub subsessions: Vec<Arc<MediaSubsession>>,
    reference_count: AtomicU32,
}

impl MediaSession {
    pub fn new(stream_name: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            session_name: session_name.into(),
            subsessions: Vec::new(),
            reference_count: AtomicU32::new(0),
        }
    }

    pub fn with_subsession(mut self, subsession: MediaSubsession) -> Self {
        self.subsessions.push(Arc::new(subsession));
        self
    }

    pub fn find_by_control(&self, control_suffix: &str) -> Option<&Arc<MediaSubsession>> {
        self.subsessions
            .iter()
            .find(|s| s.control_suffix == control_suffix)
    }

    /// Increment the RTSP-session reference count; the registry uses
    /// this to know when a `MediaSession` may be reclaimed (the registry
    /// model: refcount-based deletion).
    pub fn add_reference(&self) -> u32 {
        self.reference_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn remove_reference(&self) -> u32 {
        self.reference_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0)
            .saturating_sub(1)
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_interface() -> RtpInterface {
        use crate::net::{GroupEndpointId, GroupSocket};
        let recv = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let recv_addr = recv.local_addr().unwrap();
        let gs = GroupSocket::new_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        gs.add_destination(GroupEndpointId::new(recv_addr.ip(), recv_addr.port(), 1), 0);
        RtpInterface::datagram(Arc::new(gs))
    }

    #[test]
    fn initiate_rtcp_starts_periodic_reporting_and_tracks_bye() {
        let session = MediaSession::new("/stream", "Test")
            .with_subsession(MediaSubsession::new("track1", 96, "H264/90000"));
        let subsession = session.find_by_control("track1").unwrap().clone();

        let mut scheduler = Scheduler::new().unwrap();
        let rtcp = subsession.initiate_rtcp(&mut scheduler, loopback_interface(), "user@host");
        scheduler.single_step(Duration::from_millis(20)).unwrap();

        let bye_reason = Arc::new(Mutex::new(None));
        let seen = bye_reason.clone();
        subsession.on_peer_bye(move |reason| *seen.lock() = reason);
        rtcp.handle_incoming(&crate::rtcp::build_bye(&[subsession.ssrc], Some("done")));
        assert_eq!(bye_reason.lock().as_deref(), Some("done"));

        subsession.stop_rtcp(&mut scheduler, Some("teardown"));
    }

    #[test]
    fn find_by_control_locates_track() {
        let session = MediaSession::new("/stream", "Test")
            .with_subsession(MediaSubsession::new("track1", 96, "H264/90000"));
        assert!(session.find_by_control("track1").is_some());
        assert!(session.find_by_control("track2").is_none());
    }

    #[test]
    fn reference_counting() {
        let session = MediaSession::new("/stream", "Test");
        assert_eq!(session.add_reference(), 1);
        assert_eq!(session.add_reference(), 2);
        assert_eq!(session.remove_reference(), 1);
        assert_eq!(session.reference_count(), 1);
    }
}
