//! RTP interface: a uniform send/receive surface hiding
//! whether the underlying transport is direct UDP (via a [`GroupSocket`])
//! or RFC 2326 §10.12 interleaved framing over a TCP connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::net::GroupSocket;

/// Interleaved-frame de-framer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeframerState {
    AwaitingDollar,
    AwaitingChannelId,
    AwaitingSize1,
    AwaitingSize2,
    AwaitingPacketData,
}

/// Sentinel bytes delivered to the alternative byte handler.
pub const SENTINEL_TEARDOWN: u8 = 0xFF;
pub const SENTINEL_HANDBACK: u8 = 0xFE;

/// Per-TCP-connection de-multiplexing state, shared by every
/// [`RtpInterface`] bound to that connection. Bytes that arrive before a
/// `$` are routed to an optional alternative byte handler (the RTSP
/// control-channel parser).
pub struct SocketDescriptor {
    stream: TcpStream,
    state: DeframerState,
    channel_id: u8,
    expected_len: u16,
    frame_buf: Vec<u8>,
    channels: HashMap<u8, std::sync::Weak<Mutex<Vec<u8>>>>,
    alt_handler: Option<Box<dyn FnMut(u8) + Send>>,
}

impl SocketDescriptor {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            state: DeframerState::AwaitingDollar,
            channel_id: 0,
            expected_len: 0,
            frame_buf: Vec::new(),
            channels: HashMap::new(),
            alt_handler: None,
        }
    }

    pub fn set_alternative_byte_handler<F: FnMut(u8) + Send + 'static>(&mut self, handler: F) {
        self.alt_handler = Some(Box::new(handler));
    }

    pub fn register_channel(&mut self, channel_id: u8, sink: std::sync::Weak<Mutex<Vec<u8>>>) {
        self.channels.insert(channel_id, sink);
    }

    /// Consume readable bytes from the stream and drive the de-framer
    /// state machine. Completed frames are delivered into the registered
    /// channel's buffer; bytes before the first `$` go to the alt handler.
    pub fn pump_read(&mut self) -> Result<()> {
        let mut chunk = [0u8; 4096];
        let n = match self.stream.read(&mut chunk) {
            Ok(0) => {
                self.on_teardown();
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(_) => {
                self.on_teardown();
                return Ok(());
            }
        };

        for &byte in &chunk[..n] {
            self.feed_byte(byte);
        }
        Ok(())
    }

    fn on_teardown(&mut self) {
        if let Some(handler) = self.alt_handler.as_mut() {
            handler(SENTINEL_TEARDOWN);
        }
    }

    fn feed_byte(&mut self, byte: u8) {
        match self.state {
            DeframerState::AwaitingDollar => {
                if byte == b'$' {
                    self.state = DeframerState::AwaitingChannelId;
                } else if let Some(handler) = self.alt_handler.as_mut() {
                    handler(byte);
                }
            }
            DeframerState::AwaitingChannelId => {
                self.channel_id = byte;
                self.state = DeframerState::AwaitingSize1;
            }
            DeframerState::AwaitingSize1 => {
                self.expected_len = (byte as u16) << 8;
                self.state = DeframerState::AwaitingSize2;
            }
            DeframerState::AwaitingSize2 => {
                self.expected_len |= byte as u16;
                self.frame_buf.clear();
                self.state = if self.expected_len == 0 {
                    self.deliver_frame();
                    DeframerState::AwaitingDollar
                } else {
                    DeframerState::AwaitingPacketData
                };
            }
            DeframerState::AwaitingPacketData => {
                self.frame_buf.push(byte);
                if self.frame_buf.len() as u16 >= self.expected_len {
                    self.deliver_frame();
                    self.state = DeframerState::AwaitingDollar;
                }
            }
        }
    }

    fn deliver_frame(&mut self) {
        if let Some(sink) = self.channels.get(&self.channel_id).and_then(|w| w.upgrade()) {
            sink.lock().extend_from_slice(&self.frame_buf);
        }
        if let Some(handler) = self.alt_handler.as_mut() {
            handler(SENTINEL_HANDBACK);
        }
    }

    /// Write bytes to the connection verbatim, with no `$` framing —
    /// used by the RTSP control-channel parser to send responses over the
    /// same TCP connection that may also carry interleaved RTP.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        match self.stream.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.stream.set_nonblocking(false)?;
                let result = self.stream.write_all(data);
                self.stream.set_nonblocking(true)?;
                result?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send one interleaved frame: `$` + channel-id + u16 big-endian
    /// length + payload. If the write would block, the interface
    /// switches temporarily to blocking mode, retries once, then restores
    /// non-blocking, to avoid fragmenting the frame.
    pub fn send_interleaved(&mut self, channel_id: u8, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.push(b'$');
        frame.push(channel_id);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);

        match self.stream.write_all(&frame) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.stream.set_nonblocking(false)?;
                let result = self.stream.write_all(&frame);
                self.stream.set_nonblocking(true)?;
                result?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The underlying transport an [`RtpInterface`] delegates to.
pub enum Transport {
    Datagram(Arc<GroupSocket>),
    Interleaved {
        descriptor: Arc<Mutex<SocketDescriptor>>,
        channel_id: u8,
        inbound: Arc<Mutex<Vec<u8>>>,
    },
}

/// Uniform send/receive surface for one RTP or RTCP stream, hiding
/// whether it rides direct UDP or TCP-interleaved framing.
pub struct RtpInterface {
    transport: Transport,
}

impl RtpInterface {
    pub fn datagram(group_socket: Arc<GroupSocket>) -> Self {
        Self {
            transport: Transport::Datagram(group_socket),
        }
    }

    pub fn interleaved(descriptor: Arc<Mutex<SocketDescriptor>>, channel_id: u8) -> Self {
        let inbound = Arc::new(Mutex::new(Vec::new()));
        descriptor
            .lock()
            .register_channel(channel_id, Arc::downgrade(&inbound));
        Self {
            transport: Transport::Interleaved {
                descriptor,
                channel_id,
                inbound,
            },
        }
    }

    pub fn send(&self, payload: &[u8]) -> Result<()> {
        match &self.transport {
            Transport::Datagram(gs) => gs.output(payload),
            Transport::Interleaved {
                descriptor,
                channel_id,
                ..
            } => descriptor.lock().send_interleaved(*channel_id, payload),
        }
    }

    /// Drain any bytes de-framed for this interface's channel since the
    /// last call (interleaved transport only; datagram reads come from
    /// [`GroupSocket::handle_read`] directly).
    pub fn take_inbound(&self) -> Option<Vec<u8>> {
        match &self.transport {
            Transport::Interleaved { inbound, .. } => {
                let mut buf = inbound.lock();
                if buf.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut *buf))
                }
            }
            Transport::Datagram(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        // Exercise the deframer via a loopback TCP pair instead of a raw TcpStream,
        // since SocketDescriptor owns a TcpStream directly.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut descriptor = SocketDescriptor::new(server);
        let sink = Arc::new(Mutex::new(Vec::new()));
        descriptor.register_channel(0, Arc::downgrade(&sink));

        let mut client = client;
        client.write_all(&[b'$', 0, 0, 3, 1, 2, 3]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        descriptor.pump_read().unwrap();

        assert_eq!(*sink.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn bytes_before_dollar_go_to_alt_handler() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let mut state = DeframerState::AwaitingDollar;
        let mut handler = move |b: u8| r.lock().push(b);

        for &byte in b"RTSP/1.0" {
            if state == DeframerState::AwaitingDollar {
                if byte == b'$' {
                    state = DeframerState::AwaitingChannelId;
                } else {
                    handler(byte);
                }
            }
        }
        assert_eq!(*received.lock(), b"RTSP/1.0");
    }
}
