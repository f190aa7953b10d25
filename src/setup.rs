//! The eight byte SETUP packet

use usb_device::{
    control::{Recipient, Request, RequestType},
    UsbDirection,
};

/// `bDescriptorType` of the device descriptor
const DEVICE_DESCRIPTOR: u8 = 1;
/// Length of a complete device descriptor
const DEVICE_DESCRIPTOR_LEN: u16 = 18;

/// A control request, as received in a SETUP packet
///
/// Immutable for the lifetime of one control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// `bmRequestType`
    pub request_type: u8,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// `wLength`
    pub length: u16,
}

impl SetupPacket {
    /// Parse the eight bytes of a SETUP packet
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SetupPacket {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Parse a SETUP packet from a slice
    ///
    /// Returns `None` if `bytes` isn't exactly eight bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Self::from_bytes(bytes))
    }

    /// Returns the eight byte representation
    pub fn to_bytes(&self) -> [u8; 8] {
        let [v0, v1] = self.value.to_le_bytes();
        let [i0, i1] = self.index.to_le_bytes();
        let [l0, l1] = self.length.to_le_bytes();
        [self.request_type, self.request, v0, v1, i0, i1, l0, l1]
    }

    /// Direction of the data stage
    pub fn direction(&self) -> UsbDirection {
        if self.request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }

    /// Standard, class, or vendor request, from bits 6:5 of `bmRequestType`
    pub fn kind(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    /// The request's target, from bits 4:0 of `bmRequestType`
    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    /// The descriptor type of a GET_DESCRIPTOR request
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// The interface (or endpoint) number addressed by this request
    pub fn interface_number(&self) -> u8 {
        self.index as u8
    }

    /// Indicates if this is a standard GET_DESCRIPTOR request
    pub fn is_get_descriptor(&self) -> bool {
        self.kind() == RequestType::Standard
            && self.direction() == UsbDirection::In
            && self.request == Request::GET_DESCRIPTOR
    }

    /// Indicates if the host wants part of the device descriptor
    ///
    /// Some hosts start enumeration by asking for the first eight bytes of
    /// the device descriptor. The response to any device descriptor request
    /// that doesn't ask for the whole descriptor is cut to eight bytes.
    pub fn is_short_device_descriptor(&self) -> bool {
        self.is_get_descriptor()
            && self.descriptor_type() == DEVICE_DESCRIPTOR
            && self.length != DEVICE_DESCRIPTOR_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::SetupPacket;
    use usb_device::{
        control::{Recipient, RequestType},
        UsbDirection,
    };

    #[test]
    fn get_device_descriptor() {
        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]);
        assert_eq!(setup.direction(), UsbDirection::In);
        assert_eq!(setup.kind(), RequestType::Standard);
        assert_eq!(setup.recipient(), Recipient::Device);
        assert_eq!(setup.descriptor_type(), 1);
        assert_eq!(setup.length, 64);
        assert!(setup.is_get_descriptor());
        assert!(setup.is_short_device_descriptor());
    }

    #[test]
    fn full_device_descriptor_is_not_short() {
        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 18, 0x00]);
        assert!(!setup.is_short_device_descriptor());
        // Configuration descriptors are never short
        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 9, 0x00]);
        assert!(!setup.is_short_device_descriptor());
    }

    #[test]
    fn set_line_coding() {
        let bytes = [0x21, 0x20, 0x00, 0x00, 0x02, 0x00, 0x07, 0x00];
        let setup = SetupPacket::parse(&bytes).unwrap();
        assert_eq!(setup.direction(), UsbDirection::Out);
        assert_eq!(setup.kind(), RequestType::Class);
        assert_eq!(setup.recipient(), Recipient::Interface);
        assert_eq!(setup.interface_number(), 2);
        assert_eq!(setup.to_bytes(), bytes);
    }

    #[test]
    fn parse_wrong_size() {
        assert!(SetupPacket::parse(&[0; 7]).is_none());
        assert!(SetupPacket::parse(&[0; 9]).is_none());
    }
}
