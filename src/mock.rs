//! Recording test doubles for the USB core and the upper layer

use std::vec::Vec;

use usb_device::endpoint::EndpointAddress;

use crate::{
    control::{ControlStatus, Protocol},
    setup::SetupPacket,
    state::{ControllerState, DeviceState},
    usbcore::UsbCore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Enable(EndpointAddress),
    Disable(EndpointAddress),
    Stall(EndpointAddress),
    ClearStall(EndpointAddress),
    Reset(EndpointAddress),
    Connect(bool),
    SetAddress(u8),
    Write(EndpointAddress, Vec<u8>),
    RequestRead(EndpointAddress, usize),
}

/// Records every call, and accepts every write
pub struct MockCore {
    pub calls: Vec<Call>,
    /// Received packets, waiting to be read
    received: Vec<(EndpointAddress, Vec<u8>)>,
    /// Cap on the bytes accepted by each write
    pub write_limit: Option<usize>,
}

impl MockCore {
    pub fn new() -> Self {
        MockCore {
            calls: Vec::new(),
            received: Vec::new(),
            write_limit: None,
        }
    }

    /// Stage a packet that the next read on `addr` returns
    pub fn receive(&mut self, addr: EndpointAddress, bytes: &[u8]) {
        self.received.push((addr, bytes.to_vec()));
    }

    /// Every buffer written to `addr`
    pub fn writes(&self, addr: EndpointAddress) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Write(a, bytes) if *a == addr => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Count the calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

impl UsbCore for MockCore {
    fn enable_endpoint(&mut self, addr: EndpointAddress) {
        self.calls.push(Call::Enable(addr));
    }
    fn disable_endpoint(&mut self, addr: EndpointAddress) {
        self.calls.push(Call::Disable(addr));
    }
    fn stall_endpoint(&mut self, addr: EndpointAddress) {
        self.calls.push(Call::Stall(addr));
    }
    fn clear_stall(&mut self, addr: EndpointAddress) {
        self.calls.push(Call::ClearStall(addr));
    }
    fn reset_endpoint(&mut self, addr: EndpointAddress) {
        self.calls.push(Call::Reset(addr));
    }
    fn connect(&mut self, connect: bool) {
        self.calls.push(Call::Connect(connect));
    }
    fn set_address(&mut self, address: u8) {
        self.calls.push(Call::SetAddress(address));
    }
    fn read_endpoint(&mut self, addr: EndpointAddress, buffer: &mut [u8]) -> usize {
        let Some(idx) = self.received.iter().position(|(a, _)| *a == addr) else {
            return 0;
        };
        let (_, bytes) = self.received.remove(idx);
        let len = bytes.len().min(buffer.len());
        buffer[..len].copy_from_slice(&bytes[..len]);
        len
    }
    fn write_endpoint(&mut self, addr: EndpointAddress, buffer: &[u8]) -> usize {
        let len = self.write_limit.map_or(buffer.len(), |limit| limit.min(buffer.len()));
        self.calls.push(Call::Write(addr, buffer[..len].to_vec()));
        len
    }
    fn request_read(&mut self, addr: EndpointAddress, max_len: usize) {
        self.calls.push(Call::RequestRead(addr, max_len));
    }
}

/// Answers every control request the same way
pub struct MockProtocol {
    pub status: ControlStatus,
    /// Response for device-to-host requests
    pub data: Vec<u8>,
    pub data_calls: usize,
    /// Response to host-to-device data stages
    pub out_status: ControlStatus,
    pub out: Vec<Vec<u8>>,
    pub states: Vec<DeviceState>,
    pub setups: Vec<SetupPacket>,
    /// Endpoint halts to apply while handling the next request
    pub halt: Option<(u8, bool)>,
}

impl MockProtocol {
    pub fn responding(status: ControlStatus) -> Self {
        MockProtocol {
            status,
            data: Vec::new(),
            data_calls: 0,
            out_status: ControlStatus::Done,
            out: Vec::new(),
            states: Vec::new(),
            setups: Vec::new(),
            halt: None,
        }
    }
}

impl Protocol for MockProtocol {
    fn control(&mut self, setup: &SetupPacket, state: &mut ControllerState) -> ControlStatus {
        self.setups.push(*setup);
        if let Some((ep, halted)) = self.halt.take() {
            state.set_halted(ep, halted);
        }
        self.status
    }
    fn control_data(&mut self, _: &SetupPacket, buffer: &mut [u8]) -> usize {
        self.data_calls += 1;
        let len = self.data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&self.data[..len]);
        len
    }
    fn control_out(&mut self, _: &SetupPacket, data: &[u8]) -> ControlStatus {
        self.out.push(data.to_vec());
        self.out_status
    }
    fn state_changed(&mut self, state: DeviceState) {
        self.states.push(state);
    }
}
