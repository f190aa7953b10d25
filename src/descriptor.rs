//! Endpoint configuration, and extracting it from configuration descriptors

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbError,
};

const INTERFACE: u8 = 4;
const ENDPOINT: u8 = 5;

/// Describes one endpoint of the active configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub address: EndpointAddress,
    pub kind: EndpointType,
    /// `wMaxPacketSize`, without the high-bandwidth bits
    pub max_packet_size: u16,
    /// The interface that owns this endpoint
    pub interface: u8,
}

impl EndpointConfig {
    /// Describe an endpoint that belongs to interface 0
    pub const fn new(address: EndpointAddress, kind: EndpointType, max_packet_size: u16) -> Self {
        EndpointConfig {
            address,
            kind,
            max_packet_size,
            interface: 0,
        }
    }

    /// Assign the endpoint to `interface`
    pub const fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }
}

/// Iterates the endpoints of a configuration descriptor
///
/// Each endpoint descriptor is attributed to the interface descriptor that
/// precedes it. Isochronous endpoints produce [`UsbError::Unsupported`].
/// Malformed descriptors produce [`UsbError::ParseError`] and end the
/// iteration.
///
/// ```
/// use usbd_transfer::EndpointDescriptors;
///
/// const CONFIGURATION: &[u8] = &[
///     9, 2, 32, 0, 1, 1, 0, 0x80, 50, // configuration
///     9, 4, 0, 0, 2, 0xFF, 0, 0, 0,   // interface 0
///     7, 5, 0x81, 2, 64, 0, 0,        // EP1 IN, bulk
///     7, 5, 0x02, 2, 64, 0, 0,        // EP2 OUT, bulk
/// ];
///
/// let endpoints = EndpointDescriptors::new(CONFIGURATION);
/// assert_eq!(endpoints.filter(Result::is_ok).count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct EndpointDescriptors<'a> {
    bytes: &'a [u8],
    interface: u8,
}

impl<'a> EndpointDescriptors<'a> {
    pub fn new(configuration: &'a [u8]) -> Self {
        EndpointDescriptors {
            bytes: configuration,
            interface: 0,
        }
    }
}

impl Iterator for EndpointDescriptors<'_> {
    type Item = usb_device::Result<EndpointConfig>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let length = *self.bytes.first()? as usize;
            if length < 2 || length > self.bytes.len() {
                self.bytes = &[];
                return Some(Err(UsbError::ParseError));
            }
            let (descriptor, rest) = self.bytes.split_at(length);
            self.bytes = rest;

            match descriptor[1] {
                INTERFACE if length >= 3 => self.interface = descriptor[2],
                ENDPOINT => return Some(self.endpoint(descriptor)),
                _ => {}
            }
        }
    }
}

impl EndpointDescriptors<'_> {
    fn endpoint(&self, descriptor: &[u8]) -> usb_device::Result<EndpointConfig> {
        let &[_, _, address, attributes, mps_lo, mps_hi, ..] = descriptor else {
            return Err(UsbError::ParseError);
        };
        let kind = match attributes & 0b11 {
            0 => EndpointType::Control,
            2 => EndpointType::Bulk,
            3 => EndpointType::Interrupt,
            _ => return Err(UsbError::Unsupported),
        };
        Ok(EndpointConfig {
            address: EndpointAddress::from(address),
            kind,
            max_packet_size: u16::from_le_bytes([mps_lo, mps_hi]) & 0x7FF,
            interface: self.interface,
        })
    }
}
