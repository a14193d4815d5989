//! Fixed-maximum packet buffer with an overflow region for oversized
//! appends, used by the RTP sink while building one outgoing packet.

/// Preferred packet size target — sinks try to fill a packet to this size
/// before emitting, chosen to stay under a typical Ethernet MTU after
/// IP/UDP overhead.
pub const PREFERRED_PACKET_SIZE: usize = 1448;

/// Hard per-datagram ceiling.
pub const MAX_PACKET_SIZE: usize = 65507;

/// A packet under construction: a byte array with a packet-start cursor,
/// a write cursor, and an overflow region for bytes that didn't fit the
/// current packet and must seed the next one.
pub struct PacketBuffer {
    data: Vec<u8>,
    packet_start: usize,
    write_cursor: usize,
    max_size: usize,
    overflow: Vec<u8>,
}

impl PacketBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: vec![0u8; max_size],
            packet_start: 0,
            write_cursor: 0,
            max_size,
            overflow: Vec::new(),
        }
    }

    /// Reset cursors for a new packet, seeding it with any overflow left
    /// over from the previous one.
    pub fn reset_for_new_packet(&mut self) {
        self.packet_start = 0;
        self.write_cursor = 0;
        if !self.overflow.is_empty() {
            let overflow = std::mem::take(&mut self.overflow);
            self.append(&overflow);
        }
    }

    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.write_cursor)
    }

    pub fn len(&self) -> usize {
        self.write_cursor - self.packet_start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append bytes to the packet, growing the backing store if needed.
    pub fn append(&mut self, bytes: &[u8]) {
        let end = self.write_cursor + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.write_cursor..end].copy_from_slice(bytes);
        self.write_cursor = end;
    }

    /// Append as much of `bytes` as fits within `max_size`, pushing the
    /// remainder into the overflow region for the next packet.
    pub fn append_with_overflow(&mut self, bytes: &[u8]) -> usize {
        let fits = self.remaining().min(bytes.len());
        self.append(&bytes[..fits]);
        if fits < bytes.len() {
            self.overflow.extend_from_slice(&bytes[fits..]);
        }
        fits
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    pub fn has_overflow(&self) -> bool {
        !self.overflow.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[self.packet_start..self.write_cursor]
    }
}
