//! The transmit path
//!
//! Queued packets are coalesced into one staging buffer, then handed to the
//! core in as few writes as it allows. There's one staging buffer per core,
//! so only one IN endpoint transmits at a time.

use usb_device::endpoint::EndpointAddress;

use crate::{frame::Framing, packet::Packet, queue::Consumer, usbcore::UsbCore, TX_BUFFER_SIZE};

/// The flush policy's verdict on a transmit queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flush {
    /// Send what's queued
    Ready,
    /// The frame at the front of the queue is missing bytes
    Incomplete { missing: usize },
}

/// Decide if the queue's contents can be sent
///
/// If the oldest packet starts a frame, the whole frame must be queued before
/// it's sent. A full queue is always sent, since it can't collect the rest of
/// the frame.
pub(crate) fn flush_policy(queue: &Consumer, framing: Option<&dyn Framing>) -> Flush {
    let Some(framing) = framing else {
        return Flush::Ready;
    };
    let Some(frame_len) = queue.peek().and_then(|first| framing.frame_len(first.as_bytes())) else {
        return Flush::Ready;
    };
    let queued: usize = queue.iter().map(Packet::len).sum();
    if queued >= frame_len || queue.len() >= queue.capacity() {
        Flush::Ready
    } else {
        Flush::Incomplete {
            missing: frame_len - queued,
        }
    }
}

/// The in-flight transmit buffer
pub(crate) struct TransmitBuffer {
    buffer: [u8; TX_BUFFER_SIZE],
    len: usize,
    /// Bytes accepted by the core.
    offset: usize,
    /// The endpoint that's transmitting.
    owner: Option<EndpointAddress>,
}

impl TransmitBuffer {
    pub const fn new() -> Self {
        TransmitBuffer {
            buffer: [0; TX_BUFFER_SIZE],
            len: 0,
            offset: 0,
            owner: None,
        }
    }

    /// Indicates if a transfer is in flight
    pub fn is_busy(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner(&self) -> Option<EndpointAddress> {
        self.owner
    }

    /// Abandon the in-flight transfer
    pub fn clear(&mut self) {
        self.len = 0;
        self.offset = 0;
        self.owner = None;
    }

    /// Move whole packets from the queue into the buffer
    ///
    /// Stops before a packet that doesn't fit. Returns the staged length.
    pub fn fill(&mut self, queue: &mut Consumer) -> usize {
        self.len = 0;
        self.offset = 0;
        while let Some(next) = queue.peek() {
            let end = self.len + next.len();
            if end > self.buffer.len() {
                break;
            }
            if let Some(packet) = queue.try_pop() {
                self.buffer[self.len..end].copy_from_slice(packet.as_bytes());
                self.len = end;
            }
        }
        self.len
    }

    /// Start sending the staged bytes on `addr`
    pub fn start<C: UsbCore>(&mut self, core: &mut C, addr: EndpointAddress) {
        self.owner = Some(addr);
        self.send(core, addr);
    }

    fn send<C: UsbCore>(&mut self, core: &mut C, addr: EndpointAddress) {
        let written = core.write_endpoint(addr, &self.buffer[self.offset..self.len]);
        self.offset += written.min(self.len - self.offset);
    }

    /// The core finished sending on `addr`
    ///
    /// Sends the next chunk if there's more staged. Returns `true` while the
    /// buffer is still in flight, or `false` once it's idle.
    pub fn on_complete<C: UsbCore>(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        if self.owner != Some(addr) {
            return self.is_busy();
        }
        if self.offset < self.len {
            self.send(core, addr);
            true
        } else {
            self.clear();
            false
        }
    }
}
