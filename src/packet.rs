//! Fixed-size USB packets

use crate::PACKET_SIZE;

/// A packet buffered in a [`PacketQueue`](crate::PacketQueue)
///
/// A `Packet` is a value: it's copied into a queue when pushed, and
/// copied out when popped. Nothing in the queue aliases the caller's
/// packet.
#[derive(Clone, Copy)]
pub struct Packet {
    size: usize,
    buffer: [u8; PACKET_SIZE],
}

impl Packet {
    /// The number of bytes a packet can hold
    pub const CAPACITY: usize = PACKET_SIZE;

    /// Create an empty packet
    pub const fn new() -> Self {
        Packet {
            size: 0,
            buffer: [0; PACKET_SIZE],
        }
    }

    /// Create a packet holding a copy of `bytes`
    ///
    /// Returns `None` if `bytes` is larger than [`CAPACITY`](Packet::CAPACITY).
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut packet = Packet::new();
        packet.buffer.get_mut(..bytes.len())?.copy_from_slice(bytes);
        packet.size = bytes.len();
        Some(packet)
    }

    /// Returns the valid bytes of this packet
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    /// Returns the number of valid bytes
    pub fn len(&self) -> usize {
        self.size
    }

    /// Indicates if this packet carries no data
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Default for Packet {
    fn default() -> Self {
        Packet::new()
    }
}

impl core::fmt::Debug for Packet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet").field("size", &self.size).finish()
    }
}
