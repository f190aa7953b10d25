//! The physical USB controller
//!
//! The transfer engine doesn't touch registers. Instead, it asks a
//! [`UsbCore`] to move at most one packet at a time, and reacts to the
//! [`Event`]s that the controller's interrupt handler reports.

use crate::{control::Ep0Event, setup::SetupPacket};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// A USB device controller
///
/// Implement `UsbCore` on the type that owns your USB peripheral. Methods are
/// called from the USB interrupt, and from task context when the application
/// starts a transmit. None of them may block.
pub trait UsbCore {
    /// Enable the endpoint for transfers
    fn enable_endpoint(&mut self, addr: EndpointAddress);
    /// Disable the endpoint
    fn disable_endpoint(&mut self, addr: EndpointAddress);
    /// Stall the endpoint
    fn stall_endpoint(&mut self, addr: EndpointAddress);
    /// Clear a stall, and reset the endpoint's data toggle
    fn clear_stall(&mut self, addr: EndpointAddress);
    /// Return the endpoint to its power-on state
    ///
    /// Called for every configured endpoint during a bus reset.
    fn reset_endpoint(&mut self, addr: EndpointAddress) {
        self.clear_stall(addr);
    }
    /// Connect to (`true`) or disconnect from (`false`) the bus
    fn connect(&mut self, connect: bool);
    /// Set the device address
    ///
    /// The default implementation does nothing, for controllers that latch
    /// the address themselves.
    fn set_address(&mut self, address: u8) {
        let _ = address;
    }

    /// Copy a received packet into `buffer`
    ///
    /// Returns the number of bytes copied. The copy is truncated to the
    /// buffer's length.
    fn read_endpoint(&mut self, addr: EndpointAddress, buffer: &mut [u8]) -> usize;
    /// Start transmitting `buffer` on an IN endpoint
    ///
    /// Returns the number of bytes the controller accepted, which may be
    /// less than `buffer.len()`. The core raises [`Event::In`] once the
    /// accepted bytes are sent. A zero-length `buffer` sends a zero-length
    /// packet.
    fn write_endpoint(&mut self, addr: EndpointAddress, buffer: &[u8]) -> usize;
    /// Arm an OUT endpoint to receive up to `max_len` bytes
    fn request_read(&mut self, addr: EndpointAddress, max_len: usize);
}

/// Something that happened on the bus
///
/// Endpoint-specific events carry the endpoint number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A SETUP packet arrived on EP0
    Setup(SetupPacket),
    /// The IN endpoint finished transmitting
    In(u8),
    /// The OUT endpoint holds received data
    Out(u8),
    /// The host tried to send on an OUT endpoint that wasn't armed
    OutNak(u8),
    /// Bus reset
    Reset,
    Suspend,
    Resume,
}

impl Event {
    /// Returns the EP0 view of this event, if the event concerns EP0
    pub fn control(&self) -> Option<Ep0Event> {
        match *self {
            Event::Setup(setup) => Some(Ep0Event::Setup(setup)),
            Event::In(0) => Some(Ep0Event::In),
            Event::Out(0) => Some(Ep0Event::Out),
            Event::OutNak(0) => Some(Ep0Event::OutNak),
            _ => None,
        }
    }
}

/// EP0 OUT
pub(crate) fn ep0_out() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::Out)
}

/// EP0 IN
pub(crate) fn ep0_in() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::In)
}
