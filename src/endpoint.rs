//! Bulk and interrupt endpoints, and their queues

use usb_device::endpoint::EndpointAddress;

use crate::{
    descriptor::EndpointConfig,
    packet::Packet,
    queue::{Consumer, Producer},
    usbcore::UsbCore,
    MAX_PACKET_SIZE, PACKET_SIZE,
};

/// The driver's side of an endpoint queue
///
/// For IN endpoints, the driver consumes what the application produces.
/// For OUT endpoints, it's the other way around.
pub(crate) enum Queue<'a> {
    Transmit(Consumer<'a>),
    Receive(Producer<'a>),
}

/// What happened to a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Received {
    /// Nothing to read
    Empty,
    Queued,
    /// The queue was full
    Dropped,
}

pub(crate) struct Endpoint<'a> {
    address: EndpointAddress,
    max_packet_size: u16,
    queue: Queue<'a>,
    /// OUT endpoint is waiting for data
    armed: bool,
    /// The hardware is stalling this endpoint
    stalled: bool,
}

impl<'a> Endpoint<'a> {
    pub fn new(config: &EndpointConfig, queue: Queue<'a>) -> Self {
        Endpoint {
            address: config.address,
            max_packet_size: config.max_packet_size,
            queue,
            armed: false,
            stalled: false,
        }
    }

    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    pub fn number(&self) -> u8 {
        self.address.index() as u8
    }

    pub fn max_packet_size(&self) -> usize {
        usize::from(self.max_packet_size).min(MAX_PACKET_SIZE)
    }

    /// Queue packets needed to hold one max-size packet
    pub fn packets_per_transfer(&self) -> usize {
        self.max_packet_size().div_ceil(PACKET_SIZE).max(1)
    }

    pub fn is_transmit(&self) -> bool {
        matches!(self.queue, Queue::Transmit(_))
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// The transmit queue, if this is an IN endpoint
    pub fn consumer(&mut self) -> Option<&mut Consumer<'a>> {
        match &mut self.queue {
            Queue::Transmit(consumer) => Some(consumer),
            Queue::Receive(_) => None,
        }
    }

    /// Indicates if there's data waiting to be sent
    pub fn has_pending_output(&self) -> bool {
        match &self.queue {
            Queue::Transmit(consumer) => !consumer.is_empty(),
            Queue::Receive(_) => false,
        }
    }

    /// Drop everything in the queue
    pub fn clear_queue(&mut self) {
        match &mut self.queue {
            Queue::Transmit(consumer) => consumer.clear(),
            Queue::Receive(producer) => producer.clear(),
        }
    }

    /// Prepare the endpoint after a reset
    pub fn reset<C: UsbCore>(&mut self, core: &mut C) {
        core.reset_endpoint(self.address);
        self.armed = false;
        self.stalled = false;
        self.clear_queue();
    }

    /// Stall or un-stall the endpoint
    pub fn set_stalled<C: UsbCore>(&mut self, core: &mut C, stalled: bool) {
        if stalled == self.stalled {
            return;
        }
        if stalled {
            core.stall_endpoint(self.address);
            self.armed = false;
        } else {
            core.clear_stall(self.address);
        }
        self.stalled = stalled;
    }

    /// Forget a pending receive
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Get ready to receive a packet on an OUT endpoint
    ///
    /// Does nothing if the endpoint is already waiting for data, if it's
    /// stalled, or if the queue can't hold a max-size packet. Returns `true`
    /// if the endpoint is waiting for data.
    pub fn arm<C: UsbCore>(&mut self, core: &mut C) -> bool {
        let needed = self.packets_per_transfer();
        let Queue::Receive(producer) = &self.queue else {
            return false;
        };
        if !self.armed && !self.stalled && producer.available() >= needed {
            core.request_read(self.address, self.max_packet_size());
            self.armed = true;
        }
        self.armed
    }

    /// Move a received packet into the queue
    ///
    /// A packet larger than [`PACKET_SIZE`] is split across consecutive
    /// queue packets. If the queue can't hold all of them, the whole packet
    /// is lost.
    pub fn receive<C: UsbCore>(
        &mut self,
        core: &mut C,
        scratch: &mut [u8; MAX_PACKET_SIZE],
    ) -> Received {
        let max_len = self.max_packet_size();
        let Queue::Receive(producer) = &mut self.queue else {
            return Received::Empty;
        };
        self.armed = false;

        let len = core.read_endpoint(self.address, &mut scratch[..max_len]);
        let received = &scratch[..len.min(max_len)];
        if received.is_empty() {
            return Received::Empty;
        }
        if producer.available() < received.len().div_ceil(PACKET_SIZE) {
            return Received::Dropped;
        }
        for packet in received.chunks(PACKET_SIZE).filter_map(Packet::from_bytes) {
            producer.try_push(&packet);
        }
        Received::Queued
    }
}
