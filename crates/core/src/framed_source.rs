//! Frame-source abstraction: the boundary between codec-specific media
//! production and the codec-agnostic RTP sink in [`crate::rtp::sink`]. A
//! single pull-based interface any media producer implements, whatever
//! codec it frames.

use crate::error::Result;

/// One unit of media the RTP layer will packetize: a complete access
/// unit (e.g. one H.264 NAL, one JPEG scan, one audio frame) plus the
/// RTP-clock ticks it advances and whether it completes a marker-bit
/// boundary.
pub struct MediaFrame {
    pub data: Vec<u8>,
    pub marker: bool,
    pub timestamp_increment: u32,
}

/// A pull-based source of discrete media frames. Implementations decide
/// their own framing (NAL units, JPEG scans, fixed-duration audio
/// chunks); the RTP sink only needs `next_frame`.
pub trait FramedSource: Send {
    /// Produce the next frame, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<MediaFrame>>;
}

/// A source that instead exposes a continuous byte stream (e.g. reading
/// raw bytes off a pipe) and delegates frame boundary detection to the
/// caller. Used by demos that don't parse a specific codec.
pub trait ByteStreamSource: Send {
    /// Read up to `buf.len()` bytes, returning the number read, or 0 at
    /// end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Adapts a [`ByteStreamSource`] into a [`FramedSource`] by chunking it
/// into fixed-size frames with no marker-bit semantics — a last resort
/// for payload types that carry no natural frame boundary.
pub struct ChunkedFrameSource<S> {
    inner: S,
    chunk_size: usize,
    timestamp_increment: u32,
}

impl<S: ByteStreamSource> ChunkedFrameSource<S> {
    pub fn new(inner: S, chunk_size: usize, timestamp_increment: u32) -> Self {
        Self {
            inner,
            chunk_size,
            timestamp_increment,
        }
    }
}

impl<S: ByteStreamSource> FramedSource for ChunkedFrameSource<S> {
    fn next_frame(&mut self) -> Result<Option<MediaFrame>> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = self.inner.read_chunk(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(MediaFrame {
            data: buf,
            marker: true,
            timestamp_increment: self.timestamp_increment,
        }))
    }
}
