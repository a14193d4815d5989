//! Demo H.264 Annex B file source: extracts NAL units from a file and
//! implements [`rtsp::framed_source::FramedSource`] — codec framing
//! belongs to the caller, not the core crate.

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use rtsp::error::Result;
use rtsp::framed_source::{FramedSource, MediaFrame};

/// 30fps at the RFC 6184 90kHz clock.
const TIMESTAMP_INCREMENT: u32 = 3000;

/// Loops an Annex B `.h264` file's NAL units forever, one per
/// [`MediaFrame`] — a stand-in for a live encoder in this demo.
pub struct H264FileSource {
    nals: Vec<Vec<u8>>,
    next: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let nals = extract_nal_units(&data);

        let mut sps = None;
        let mut pps = None;
        for nal in &nals {
            let Some(&first) = nal.first() else { continue };
            match first & 0x1f {
                7 if sps.is_none() => sps = Some(nal.clone()),
                8 if pps.is_none() => pps = Some(nal.clone()),
                _ => {}
            }
        }

        Ok(Self {
            nals,
            next: 0,
            sps,
            pps,
        })
    }

    /// The `a=fmtp` value to advertise in SDP, once SPS/PPS have been
    /// found in the file (RFC 6184 §8.1).
    pub fn fmtp_line(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!(
            "packetization-mode=1;profile-level-id={:02x}{:02x}{:02x};sprop-parameter-sets={},{}",
            sps[1],
            sps[2],
            sps[3],
            BASE64.encode(sps),
            BASE64.encode(pps),
        ))
    }
}

impl FramedSource for H264FileSource {
    /// Never signals end-of-stream — wraps around to the first NAL once
    /// the file is exhausted, simulating a continuously encoding camera.
    fn next_frame(&mut self) -> Result<Option<MediaFrame>> {
        if self.nals.is_empty() {
            return Ok(None);
        }
        if self.next >= self.nals.len() {
            self.next = 0;
        }
        let nal = self.nals[self.next].clone();
        self.next += 1;
        Ok(Some(MediaFrame {
            data: nal,
            marker: true,
            timestamp_increment: TIMESTAMP_INCREMENT,
        }))
    }
}

/// Extract NAL units from an Annex B bitstream, handling both 3- and
/// 4-byte start codes.
fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;
    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            starts.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &(start, _)) in starts.iter().enumerate() {
        let end = match starts.get(idx + 1) {
            Some(&(next_start, next_len)) => next_start - next_len,
            None => data.len(),
        };
        if start < end {
            nals.push(data[start..end].to_vec());
        }
    }
    nals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loops_back_to_first_nal_after_exhausting_file() {
        let mut file = tempfile().unwrap();
        file.write_all(&[0, 0, 0, 1, 0x65, 0xAA]).unwrap();
        file.write_all(&[0, 0, 0, 1, 0x41, 0xBB]).unwrap();
        let mut source = H264FileSource::open(file.path()).unwrap();

        let f1 = source.next_frame().unwrap().unwrap();
        let f2 = source.next_frame().unwrap().unwrap();
        let f3 = source.next_frame().unwrap().unwrap();
        assert_eq!(f1.data, vec![0x65, 0xAA]);
        assert_eq!(f2.data, vec![0x41, 0xBB]);
        assert_eq!(f3.data, f1.data, "wraps around after exhausting the file");
    }

    #[test]
    fn fmtp_line_captures_sps_pps() {
        let mut file = tempfile().unwrap();
        file.write_all(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e]).unwrap();
        file.write_all(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]).unwrap();
        let source = H264FileSource::open(file.path()).unwrap();
        let fmtp = source.fmtp_line().unwrap();
        assert!(fmtp.contains("profile-level-id=42001e"));
        assert!(fmtp.contains("sprop-parameter-sets="));
    }

    fn tempfile() -> std::io::Result<tempfile_shim::NamedFile> {
        tempfile_shim::NamedFile::new()
    }

    /// Minimal named-temp-file helper — avoids an extra dev-dependency
    /// for a handful of tests.
    mod tempfile_shim {
        use std::fs::File;
        use std::path::{Path, PathBuf};

        pub struct NamedFile {
            file: File,
            path: PathBuf,
        }

        impl NamedFile {
            pub fn new() -> std::io::Result<Self> {
                let path = std::env::temp_dir().join(format!(
                    "rtsp-rs-h264-test-{}-{}",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_nanos()
                ));
                let file = File::create(&path)?;
                Ok(Self { file, path })
            }

            pub fn path(&self) -> &Path {
                &self.path
            }
        }

        impl std::io::Write for NamedFile {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.file.write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                self.file.flush()
            }
        }

        impl Drop for NamedFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
