use clap::Parser;

use rtsp::RtspClient;

#[derive(Parser)]
#[command(name = "rtsp-client", about = "RTSP client demo: DESCRIBE, SETUP, and PLAY a stream")]
struct Args {
    /// Server control address, e.g. 127.0.0.1:8554
    #[arg(long, short)]
    server: String,

    /// Mount path to request, e.g. /stream
    #[arg(long, short, default_value = "/stream")]
    path: String,

    /// UDP port the client listens on for RTP
    #[arg(long, default_value_t = 8000)]
    client_port: u16,

    /// Digest credentials, username:password
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

    let mut client = match RtspClient::connect(&args.server) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to connect to {}: {e}", args.server);
            return;
        }
    };
    if let Some((username, password)) = args.credential {
        client = client.with_credentials(username, password);
    }

    let uri = format!("rtsp://{}{}", args.server, args.path);

    match client.options(&uri) {
        Ok(response) => println!("OPTIONS -> {} {}", response.status_code, response.status_text),
        Err(e) => {
            eprintln!("OPTIONS failed: {e}");
            return;
        }
    }

    let sdp = match client.describe(&uri) {
        Ok(sdp) => sdp,
        Err(e) => {
            eprintln!("DESCRIBE failed: {e}");
            return;
        }
    };
    println!("DESCRIBE -> {} track(s)", sdp.media.len());

    let Some(track) = sdp.media.first() else {
        eprintln!("stream has no media tracks");
        return;
    };
    let track_uri = format!("{uri}/{}", track.control);
    let transport_header = format!(
        "RTP/AVP;unicast;client_port={}-{}",
        args.client_port,
        args.client_port + 1
    );

    let transport = match client.setup(&track_uri, &transport_header) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("SETUP failed: {e}");
            return;
        }
    };
    println!(
        "SETUP -> session {} ({:?}, client_port={})",
        client.session_id().unwrap_or("?"),
        transport.kind,
        transport.client_rtp_port,
    );

    match client.play(&uri) {
        Ok(response) => println!("PLAY -> {} {}", response.status_code, response.status_text),
        Err(e) => {
            eprintln!("PLAY failed: {e}");
            return;
        }
    }

    println!("streaming — press Enter to tear down");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).unwrap();

    match client.teardown(&uri) {
        Ok(response) => println!("TEARDOWN -> {} {}", response.status_code, response.status_text),
        Err(e) => eprintln!("TEARDOWN failed: {e}"),
    }
}
