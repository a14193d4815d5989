use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;

use rtsp::framed_source::FramedSource;
use rtsp::rtp::Frame;
use rtsp::rtsp::digest::{DigestAuthenticator, DigestCredential};
use rtsp::{MediaSession, MediaSubsession, MountRegistry, RtspServer, ServerConfig};

mod h264;
use h264::H264FileSource;

#[derive(Parser)]
#[command(name = "rtsp-server", about = "Standalone RTSP server for H.264 streams")]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Annex B .h264 file to loop and serve
    #[arg(long, short)]
    file: PathBuf,

    /// Mount path to publish the stream under
    #[arg(long, default_value = "/stream")]
    path: String,

    /// Require Digest auth with this username:password pair
    #[arg(long, value_parser = parse_credential)]
    credential: Option<(String, String)>,
}

fn parse_credential(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .ok_or_else(|| "expected username:password".to_string())
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let source = match H264FileSource::open(&args.file) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            eprintln!("failed to open {}: {e}", args.file.display());
            return;
        }
    };

    let mut subsession = MediaSubsession::new("track1", 96, "H264/90000");
    if let Some(fmtp) = source.lock().fmtp_line() {
        subsession = subsession.with_fmtp(fmtp);
    }
    let media_session = MediaSession::new(&args.path, "rtsp-rs demo stream").with_subsession(subsession);

    let mounts = MountRegistry::new();
    let media_session = mounts.add(&args.path, media_session);
    mounts.set_default(&args.path);

    let mut server = match RtspServer::new(&args.bind, mounts, ServerConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", args.bind);
            return;
        }
    };
    if let Some((username, password)) = &args.credential {
        let authenticator = DigestAuthenticator::new(
            "rtsp-rs",
            vec![DigestCredential::new(username, "rtsp-rs", password)],
        );
        server = server.with_authenticator(authenticator);
    }

    let session_manager = server.session_manager().clone();
    let stop = server.stop_handle();

    thread::spawn(move || {
        let Some(subsession) = media_session.subsessions.first().cloned() else {
            return;
        };
        loop {
            thread::sleep(Duration::from_millis(33));
            if session_manager.get_playing_sessions().is_empty() {
                continue;
            }
            let frame = match source.lock().next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "frame source failed");
                    break;
                }
            };
            let frame = Frame {
                data: frame.data,
                marker: frame.marker,
                timestamp_increment: frame.timestamp_increment,
            };
            if let Err(e) = subsession.send_frame(&frame) {
                tracing::debug!(error = %e, "send_frame skipped");
            }
        }
    });

    println!("RTSP server on {} serving {} — press Enter to stop", args.bind, args.path);

    let run_thread = thread::spawn(move || {
        if let Err(e) = server.run() {
            eprintln!("server stopped: {e}");
        }
    });

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    stop.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = run_thread.join();
}
