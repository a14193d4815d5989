//! End-to-end handshakes against a live [`RtspServer`]: unicast UDP
//! transport with a frame actually arriving at the client, and TCP-
//! interleaved transport negotiation.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use rtsp::rtp::Frame;
use rtsp::session::transport::TransportKind;
use rtsp::{MediaSession, MediaSubsession, MountRegistry, RtspClient, RtspServer, ServerConfig};

fn spawn_server(mount_path: &str) -> (String, MediaSession, std::sync::Arc<std::sync::atomic::AtomicBool>) {
    let mounts = MountRegistry::new();
    let session = MediaSession::new("demo", "integration test stream")
        .with_subsession(MediaSubsession::new("track1", 96, "H264/90000"));
    let session = mounts.add(mount_path, session);
    mounts.set_default(mount_path);

    let mut server = RtspServer::new("127.0.0.1:0", mounts, ServerConfig::default()).expect("bind");
    let addr = server.listener_addr().expect("addr").to_string();
    let stop = server.stop_handle();
    thread::spawn(move || {
        let _ = server.run();
    });
    // give the background acceptor a moment to register its fd.
    thread::sleep(Duration::from_millis(50));
    (addr, session, stop)
}

#[test]
fn unicast_udp_handshake_delivers_a_frame() {
    let (addr, media_session, stop) = spawn_server("/stream");
    let base_uri = format!("rtsp://{addr}/stream");

    let client_sock = UdpSocket::bind("127.0.0.1:0").expect("bind rtp listener");
    client_sock
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let client_port = client_sock.local_addr().unwrap().port();

    let mut client = RtspClient::connect(&addr).expect("connect");

    let options = client.options(&base_uri).expect("OPTIONS");
    assert_eq!(options.status_code, 200);

    let sdp = client.describe(&base_uri).expect("DESCRIBE");
    assert_eq!(sdp.media.len(), 1);
    assert_eq!(sdp.media[0].rtpmap.as_deref(), Some("H264/90000"));

    let setup_uri = format!("{base_uri}/track1");
    let transport = client
        .setup(&setup_uri, &format!("RTP/AVP;unicast;client_port={client_port}-{}", client_port + 1))
        .expect("SETUP");
    assert_eq!(transport.kind, TransportKind::UnicastUdp);
    assert!(client.session_id().is_some());

    let play = client.play(&base_uri).expect("PLAY");
    assert_eq!(play.status_code, 200);
    assert!(play.get_header("RTP-Info").is_some());

    let subsession = media_session.subsessions[0].clone();
    subsession
        .send_frame(&Frame {
            data: vec![0x65, 1, 2, 3],
            marker: true,
            timestamp_increment: 3000,
        })
        .expect("send_frame");

    let mut buf = [0u8; 2048];
    let (n, _) = client_sock.recv_from(&mut buf).expect("recv RTP packet");
    assert!(n >= 12, "RTP packet shorter than a header");
    assert_eq!(buf[0] >> 6, 2, "RTP version field");
    assert_eq!(buf[1] & 0x7f, 96, "payload type");

    client.teardown(&base_uri).expect("TEARDOWN");
    assert!(client.session_id().is_none());
    stop.store(true, std::sync::atomic::Ordering::SeqCst);
}

#[test]
fn tcp_interleaved_handshake_negotiates_channel_and_accepts_sends() {
    let (addr, media_session, stop) = spawn_server("/stream");
    let base_uri = format!("rtsp://{addr}/stream");

    let mut client = RtspClient::connect(&addr).expect("connect");
    client.describe(&base_uri).expect("DESCRIBE");

    let setup_uri = format!("{base_uri}/track1");
    let transport = client
        .setup(&setup_uri, "RTP/AVP/TCP;interleaved=0-1")
        .expect("SETUP");
    assert_eq!(transport.kind, TransportKind::Interleaved);
    assert_eq!(transport.interleaved_rtp_channel, Some(0));
    assert_eq!(transport.interleaved_rtcp_channel, Some(1));

    client.play(&base_uri).expect("PLAY");

    // The RTP frame is written as a `$` + channel + u16 length + payload
    // interleaved block onto the same control connection (RFC 2326
    // §10.12); what the client observes here is that the connection
    // stays usable for further RTSP requests after it.
    let subsession = media_session.subsessions[0].clone();
    subsession
        .send_frame(&Frame {
            data: vec![0x65, 9, 9, 9],
            marker: true,
            timestamp_increment: 3000,
        })
        .expect("send_frame over interleaved transport");

    let options = client.options(&base_uri).expect("OPTIONS after interleaved send");
    assert_eq!(options.status_code, 200);

    stop.store(true, std::sync::atomic::Ordering::SeqCst);
}
