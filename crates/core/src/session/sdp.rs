//! SDP generation and parsing (RFC 4566): a generate/parse pair covering
//! multiple media sections and the `a=key-mgmt` MIKEY attribute (RFC
//! 4567) used to carry SRTP keys.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{Result, RtspError};
use crate::rtp::mikey::{self, MikeyKeyMaterial};

/// One `m=` media section and its attributes.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub media_type: String,
    pub payload_type: u8,
    pub rtpmap: Option<String>,
    pub fmtp: Option<String>,
    pub control: String,
    pub key_mgmt: Option<MikeyKeyMaterial>,
}

/// A full session description: origin/session-level fields plus the
/// media sections (one per track).
#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub address: String,
    pub session_name: String,
    pub media: Vec<MediaDescription>,
}

/// Generate the SDP body for a DESCRIBE response, one `m=` line per
/// media description, in the order given.
pub fn generate(desc: &SessionDescription) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("v=0".to_string());
    lines.push(format!(
        "o={} {} {} IN IP4 {}",
        desc.username, desc.session_id, desc.session_version, desc.address
    ));
    lines.push(format!("s={}", desc.session_name));
    lines.push(format!("c=IN IP4 {}", desc.address));
    lines.push("t=0 0".to_string());
    lines.push("a=tool:rtsp-rs".to_string());
    lines.push("a=sendonly".to_string());

    for media in &desc.media {
        lines.push(format!(
            "m={} 0 RTP/AVP {}",
            media.media_type, media.payload_type
        ));
        if let Some(rtpmap) = &media.rtpmap {
            lines.push(format!("a=rtpmap:{} {}", media.payload_type, rtpmap));
        }
        if let Some(fmtp) = &media.fmtp {
            lines.push(format!("a=fmtp:{} {}", media.payload_type, fmtp));
        }
        if let Some(key) = &media.key_mgmt {
            let encoded = BASE64.encode(mikey::encode(key));
            lines.push(format!("a=key-mgmt:mikey {encoded}"));
        }
        lines.push(format!("a=control:{}", media.control));
    }

    tracing::debug!(tracks = desc.media.len(), "generated SDP");
    format!("{}\r\n", lines.join("\r\n"))
}

/// Parse an SDP body received from a DESCRIBE response (client role,
/// and SDP media descriptions): extract origin/session-level fields and one
/// [`MediaDescription`] per `m=` line.
pub fn parse(body: &str) -> Result<SessionDescription> {
    let mut username = String::from("-");
    let mut session_id = String::from("0");
    let mut session_version = String::from("0");
    let mut address = String::new();
    let mut session_name = String::new();
    let mut media: Vec<MediaDescription> = Vec::new();

    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }
        let value = &line[2..];

        match &line[..1] {
            "o" => {
                let parts: Vec<&str> = value.split_whitespace().collect();
                if parts.len() >= 6 {
                    username = parts[0].to_string();
                    session_id = parts[1].to_string();
                    session_version = parts[2].to_string();
                    address = parts[5].to_string();
                }
            }
            "s" => session_name = value.to_string(),
            "c" if media.is_empty() => {
                if let Some(addr) = value.split_whitespace().nth(2) {
                    address = addr.to_string();
                }
            }
            "m" => {
                let parts: Vec<&str> = value.split_whitespace().collect();
                if parts.len() < 4 {
                    return Err(RtspError::SdpParse(format!("malformed m= line: {value}")));
                }
                let payload_type = parts[3].parse().map_err(|_| {
                    RtspError::SdpParse(format!("invalid payload type in m= line: {value}"))
                })?;
                media.push(MediaDescription {
                    media_type: parts[0].to_string(),
                    payload_type,
                    rtpmap: None,
                    fmtp: None,
                    control: String::new(),
                    key_mgmt: None,
                });
            }
            "a" => {
                let Some(last) = media.last_mut() else {
                    continue;
                };
                if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
                    last.rtpmap = rtpmap.split_once(' ').map(|(_, codec)| codec.to_string());
                } else if let Some(fmtp) = value.strip_prefix("fmtp:") {
                    last.fmtp = fmtp.split_once(' ').map(|(_, params)| params.to_string());
                } else if let Some(control) = value.strip_prefix("control:") {
                    last.control = control.to_string();
                } else if let Some(key_mgmt) = value.strip_prefix("key-mgmt:mikey ") {
                    let decoded = BASE64
                        .decode(key_mgmt.trim())
                        .map_err(|e| RtspError::SdpParse(format!("invalid key-mgmt base64: {e}")))?;
                    last.key_mgmt = Some(mikey::parse(&decoded)?);
                }
            }
            _ => {}
        }
    }

    if address.is_empty() {
        return Err(RtspError::SdpParse("missing connection address".into()));
    }

    Ok(SessionDescription {
        username,
        session_id,
        session_version,
        address,
        session_name,
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionDescription {
        SessionDescription {
            username: "server".to_string(),
            session_id: "1234567890".to_string(),
            session_version: "1".to_string(),
            address: "192.168.1.100".to_string(),
            session_name: "Test Session".to_string(),
            media: vec![MediaDescription {
                media_type: "video".to_string(),
                payload_type: 96,
                rtpmap: Some("H264/90000".to_string()),
                fmtp: Some("packetization-mode=1".to_string()),
                control: "track1".to_string(),
                key_mgmt: None,
            }],
        }
    }

    #[test]
    fn generates_h264_sdp() {
        let sdp = generate(&sample());
        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=server 1234567890 1 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=Test Session\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=fmtp:96 packetization-mode=1\r\n"));
        assert!(sdp.contains("a=control:track1\r\n"));

        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        let fmtp_idx = sdp.find("a=fmtp").unwrap();
        assert!(rtpmap_idx < fmtp_idx, "rtpmap must precede fmtp per RFC 6184");
    }

    #[test]
    fn generate_then_parse_roundtrips() {
        let original = sample();
        let sdp = generate(&original);
        let parsed = parse(&sdp).unwrap();
        assert_eq!(parsed.address, original.address);
        assert_eq!(parsed.session_name, original.session_name);
        assert_eq!(parsed.media.len(), 1);
        assert_eq!(parsed.media[0].payload_type, 96);
        assert_eq!(parsed.media[0].rtpmap.as_deref(), Some("H264/90000"));
        assert_eq!(parsed.media[0].control, "track1");
    }

    #[test]
    fn parse_rejects_missing_address() {
        assert!(parse("v=0\r\ns=x\r\n").is_err());
    }

    #[test]
    fn parse_carries_mikey_key_mgmt() {
        let mut desc = sample();
        desc.media[0].key_mgmt = Some(MikeyKeyMaterial {
            master_key: [9u8; 16],
            master_salt: [8u8; 14],
            mki: [1, 2, 3, 4],
            csb_id: 42,
        });
        let sdp = generate(&desc);
        let parsed = parse(&sdp).unwrap();
        assert!(parsed.media[0].key_mgmt.is_some());
        assert_eq!(parsed.media[0].key_mgmt.unwrap().csb_id, 42);
    }
}
