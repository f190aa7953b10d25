//! EP0 control transfers
//!
//! Control transfers progress through SETUP, an optional DATA stage, and a
//! STATUS stage. Every SETUP restarts the state machine, no matter where the
//! previous transfer stopped. The upper layer decides what a request means
//! by implementing [`Protocol`]; this module only moves bytes and stages the
//! handshakes.

use bitflags::bitflags;
use usb_device::UsbDirection;

use crate::{
    setup::SetupPacket,
    state::{ControllerState, DeviceState},
    usbcore::{ep0_in, ep0_out, UsbCore},
    CONTROL_BUFFER_SIZE, EP0_MAX_PACKET_SIZE,
};

/// The upper layer's response to a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    /// Response data is ready, or, for host-to-device requests, the
    /// handler is ready to receive the data stage
    Data,
    /// Handled, and there's no data stage
    Done,
    /// The request is unsupported, or failed
    Stall,
    /// Handled, and the handler already finished the status stage
    Status,
    /// The host selected a configuration
    Configuration,
    /// The host assigned a new address
    Address,
    /// The host changed the remote wakeup feature
    RemoteWakeup,
}

/// The upper protocol layer
///
/// A `Protocol` decodes control requests, supplies their data stage, and
/// observes device state changes. All methods run in the USB interrupt.
pub trait Protocol {
    /// Handle a control request
    ///
    /// `state` exposes endpoint halts, which are applied to the
    /// hardware once this call returns.
    fn control(&mut self, setup: &SetupPacket, state: &mut ControllerState) -> ControlStatus;

    /// Fill `buffer` with the response to a device-to-host request
    ///
    /// Called after [`control()`](Protocol::control) returns
    /// [`Data`](ControlStatus::Data). Returns the response length.
    /// Responses longer than the host requested are truncated.
    fn control_data(&mut self, setup: &SetupPacket, buffer: &mut [u8]) -> usize;

    /// Consume the data stage of a host-to-device request
    ///
    /// Return [`Done`](ControlStatus::Done) to acknowledge it,
    /// [`Status`](ControlStatus::Status) if you already acknowledged it,
    /// or [`Stall`](ControlStatus::Stall) to reject it.
    fn control_out(&mut self, setup: &SetupPacket, data: &[u8]) -> ControlStatus {
        let _ = (setup, data);
        ControlStatus::Done
    }

    /// The device state changed
    fn state_changed(&mut self, state: DeviceState) {
        let _ = state;
    }
}

/// Where EP0 is in a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlStage {
    #[default]
    Idle,
    SetupReceived,
    /// Sending the response
    DataIn,
    /// Receiving the host's data
    DataOut,
    /// No data stage; waiting for the status IN to finish
    NoData,
    /// Data stage finished; waiting for the status handshake
    StatusPending,
}

/// An EP0 event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ep0Event {
    Setup(SetupPacket),
    In,
    Out,
    OutNak,
}

/// Indicates if an EP0 handler consumed an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ep0Result {
    Handled,
    /// The handler didn't complete the event. For SETUP, this means that
    /// EP0 stalled, or that the controller finishes an address change.
    Unhandled,
}

/// Handles EP0 events
///
/// The [`Driver`](crate::Driver) implements `Ep0Handler`. Wrap it to observe
/// or supplement its EP0 behaviors; see [`CdcShim`](crate::CdcShim).
pub trait Ep0Handler<C: UsbCore> {
    fn on_ep0(&mut self, core: &mut C, event: Ep0Event) -> Ep0Result;

    /// Where the handler is in the current control transfer
    ///
    /// Handlers that don't track stages report [`ControlStage::Idle`].
    fn control_stage(&self) -> ControlStage {
        ControlStage::Idle
    }

    /// Leave the status IN of the current host-to-device data stage to the
    /// caller
    ///
    /// Returns `true` if the handler won't send it. Handlers that always
    /// send their own status return `false`.
    fn defer_status(&mut self) -> bool {
        false
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct ControlFlags: u8 {
        /// The response is a truncated device descriptor
        const SHORT_DESCRIPTOR = 1 << 0;
        /// Terminate the data stage with a zero-length packet
        const ZLP = 1 << 1;
        /// Configure the device once the status stage finishes
        const CONFIGURATION_PENDING = 1 << 2;
        /// The status stage finished for a configuration request
        const CONFIGURED = 1 << 3;
        /// Someone else sends the status IN after the data stage
        const DEFER_STATUS = 1 << 4;
    }
}

/// Length of the truncated device descriptor
const SHORT_DESCRIPTOR_LEN: usize = 8;

/// EP0 state for one USB core
pub struct ControlTransferContext {
    stage: ControlStage,
    setup: Option<SetupPacket>,
    buffer: [u8; CONTROL_BUFFER_SIZE],
    /// Data stage length.
    len: usize,
    /// Bytes moved in the data stage.
    offset: usize,
    flags: ControlFlags,
}

impl ControlTransferContext {
    pub const fn new() -> Self {
        ControlTransferContext {
            stage: ControlStage::Idle,
            setup: None,
            buffer: [0; CONTROL_BUFFER_SIZE],
            len: 0,
            offset: 0,
            flags: ControlFlags::empty(),
        }
    }

    pub fn stage(&self) -> ControlStage {
        self.stage
    }

    /// The request of the in-flight control transfer
    pub fn setup(&self) -> Option<&SetupPacket> {
        self.setup.as_ref()
    }

    /// Abandon any transfer
    pub fn reset(&mut self) {
        self.stage = ControlStage::Idle;
        self.setup = None;
        self.len = 0;
        self.offset = 0;
        self.flags = ControlFlags::empty();
    }

    /// Don't send the status IN after the current data OUT stage
    ///
    /// Returns `false` if there's no data OUT stage in progress.
    pub fn defer_status(&mut self) -> bool {
        let deferred = self.stage == ControlStage::DataOut;
        self.flags.set(ControlFlags::DEFER_STATUS, deferred);
        deferred
    }

    /// Returns `true` once after a configuration request finishes
    pub fn take_configured(&mut self) -> bool {
        let configured = self.flags.contains(ControlFlags::CONFIGURED);
        self.flags.remove(ControlFlags::CONFIGURED);
        configured
    }

    fn idle(&mut self, state: &mut ControllerState) {
        if self.flags.contains(ControlFlags::CONFIGURATION_PENDING) {
            self.flags.insert(ControlFlags::CONFIGURED);
        }
        self.flags.remove(
            ControlFlags::CONFIGURATION_PENDING
                | ControlFlags::SHORT_DESCRIPTOR
                | ControlFlags::ZLP
                | ControlFlags::DEFER_STATUS,
        );
        self.stage = ControlStage::Idle;
        state.data_callback_armed = false;
    }

    fn stall<C: UsbCore>(&mut self, core: &mut C, state: &mut ControllerState) -> Ep0Result {
        core.stall_endpoint(ep0_in());
        core.stall_endpoint(ep0_out());
        self.reset();
        state.data_callback_armed = false;
        Ep0Result::Unhandled
    }

    /// Send a zero-length status packet
    fn status_in<C: UsbCore>(&mut self, core: &mut C) {
        core.write_endpoint(ep0_in(), &[]);
    }

    /// Send the next data stage packet
    fn send_chunk<C: UsbCore>(&mut self, core: &mut C) {
        let end = self.len.min(self.offset + EP0_MAX_PACKET_SIZE);
        let written = core.write_endpoint(ep0_in(), &self.buffer[self.offset..end]);
        self.offset += written.min(end - self.offset);
    }

    fn arm_out<C: UsbCore>(&mut self, core: &mut C) {
        let remaining = self.len - self.offset;
        core.request_read(ep0_out(), remaining.min(EP0_MAX_PACKET_SIZE));
    }

    /// Handle a SETUP packet
    pub fn on_setup<C: UsbCore, P: Protocol>(
        &mut self,
        core: &mut C,
        protocol: &mut P,
        state: &mut ControllerState,
        setup: SetupPacket,
    ) -> Ep0Result {
        // Whatever happened before, SETUP wins.
        self.reset();
        self.stage = ControlStage::SetupReceived;
        self.setup = Some(setup);
        self.flags
            .set(ControlFlags::SHORT_DESCRIPTOR, setup.is_short_device_descriptor());

        let status = protocol.control(&setup, state);
        debug!(
            "EP0 SETUP {:02X} {:02X} value={:04X} index={:04X} length={} => {:?}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            setup.length,
            status
        );

        match status {
            ControlStatus::Stall => return self.stall(core, state),
            ControlStatus::Address => {
                let address = (setup.value & 0x7F) as u8;
                state.address = address;
                core.set_address(address);
                if let Some(next) = state.tracker.address() {
                    protocol.state_changed(next);
                }
                debug!("ADDRESS {}", address);
                self.reset();
                state.data_callback_armed = false;
                return Ep0Result::Unhandled;
            }
            ControlStatus::Data => state.data_callback_armed = true,
            ControlStatus::Done => state.data_callback_armed = false,
            ControlStatus::Configuration => {
                self.flags.insert(ControlFlags::CONFIGURATION_PENDING);
            }
            ControlStatus::Status | ControlStatus::RemoteWakeup => {}
        }

        let length = usize::from(setup.length);
        match setup.direction() {
            UsbDirection::Out
                if length > 0 && matches!(status, ControlStatus::Data | ControlStatus::Done) =>
            {
                if length > self.buffer.len() {
                    warn!("EP0 OUT data stage of {} bytes is too large", length);
                    return self.stall(core, state);
                }
                self.len = length;
                self.stage = ControlStage::DataOut;
                self.arm_out(core);
                return Ep0Result::Handled;
            }
            UsbDirection::In if state.data_callback_armed => {
                let size = protocol.control_data(&setup, &mut self.buffer).min(self.buffer.len());
                let short = self.flags.contains(ControlFlags::SHORT_DESCRIPTOR);
                let count = if short { SHORT_DESCRIPTOR_LEN.min(size) } else { size };
                self.len = count.min(length);
                self.flags.set(
                    ControlFlags::ZLP,
                    self.len > 0 && self.len < length && self.len % EP0_MAX_PACKET_SIZE == 0,
                );
                if short {
                    state.data_callback_armed = false;
                }
                debug!("EP0 IN data stage of {} bytes", self.len);
                self.stage = ControlStage::DataIn;
                self.send_chunk(core);
                return Ep0Result::Handled;
            }
            _ => {}
        }

        if status == ControlStatus::Status {
            // The handler finished the transfer.
            self.idle(state);
        } else {
            self.status_in(core);
            self.stage = ControlStage::NoData;
        }
        Ep0Result::Handled
    }

    /// Handle an EP0 IN completion
    pub fn on_in<C: UsbCore>(&mut self, core: &mut C, state: &mut ControllerState) -> Ep0Result {
        match self.stage {
            ControlStage::DataIn => {
                if self.offset < self.len {
                    self.send_chunk(core);
                } else if self.flags.contains(ControlFlags::ZLP) {
                    self.flags.remove(ControlFlags::ZLP);
                    core.write_endpoint(ep0_in(), &[]);
                } else {
                    // Host acknowledges with a zero-length OUT.
                    core.request_read(ep0_out(), 0);
                    self.stage = ControlStage::StatusPending;
                }
                Ep0Result::Handled
            }
            ControlStage::NoData => {
                self.idle(state);
                Ep0Result::Handled
            }
            ControlStage::StatusPending if self.status_direction() == UsbDirection::In => {
                self.idle(state);
                Ep0Result::Handled
            }
            _ => Ep0Result::Unhandled,
        }
    }

    /// Handle received EP0 OUT data
    pub fn on_out<C: UsbCore, P: Protocol>(
        &mut self,
        core: &mut C,
        protocol: &mut P,
        state: &mut ControllerState,
    ) -> Ep0Result {
        match self.stage {
            ControlStage::DataOut => {
                let received = core.read_endpoint(ep0_out(), &mut self.buffer[self.offset..self.len]);
                self.offset += received;
                if self.offset < self.len && received == EP0_MAX_PACKET_SIZE {
                    self.arm_out(core);
                    return Ep0Result::Handled;
                }

                let Some(setup) = self.setup else {
                    return Ep0Result::Unhandled;
                };
                let status = protocol.control_out(&setup, &self.buffer[..self.offset]);
                debug!("EP0 OUT data stage of {} bytes => {:?}", self.offset, status);
                match status {
                    ControlStatus::Stall => self.stall(core, state),
                    ControlStatus::Status => {
                        self.idle(state);
                        Ep0Result::Handled
                    }
                    _ => {
                        if !self.flags.contains(ControlFlags::DEFER_STATUS) {
                            self.status_in(core);
                        }
                        self.stage = ControlStage::StatusPending;
                        Ep0Result::Handled
                    }
                }
            }
            ControlStage::StatusPending if self.status_direction() == UsbDirection::Out => {
                let mut zlp = [0; 0];
                core.read_endpoint(ep0_out(), &mut zlp);
                self.idle(state);
                Ep0Result::Handled
            }
            _ => Ep0Result::Unhandled,
        }
    }

    /// Handle an EP0 OUT NAK
    pub fn on_out_nak<C: UsbCore>(&mut self, core: &mut C) -> Ep0Result {
        if self.stage == ControlStage::DataOut {
            self.arm_out(core);
            Ep0Result::Handled
        } else {
            Ep0Result::Unhandled
        }
    }

    /// Status stage direction is opposite of the data stage
    fn status_direction(&self) -> UsbDirection {
        match self.setup.map(|setup| setup.direction()) {
            Some(UsbDirection::In) => UsbDirection::Out,
            _ => UsbDirection::In,
        }
    }
}

impl Default for ControlTransferContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlStage, ControlStatus, ControlTransferContext, Ep0Result};
    use crate::{
        mock::{Call, MockCore, MockProtocol},
        setup::SetupPacket,
        state::{ControllerState, DeviceState},
        usbcore::{ep0_in, ep0_out},
    };

    const GET_DEVICE_DESCRIPTOR_8: SetupPacket =
        SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00]);
    const GET_DEVICE_DESCRIPTOR: SetupPacket =
        SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
    const SET_LINE_CODING: SetupPacket =
        SetupPacket::from_bytes([0x21, 0x20, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
    const SET_CONFIGURATION: SetupPacket =
        SetupPacket::from_bytes([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
    const SET_ADDRESS: SetupPacket =
        SetupPacket::from_bytes([0x00, 0x05, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00]);

    fn device_descriptor() -> MockProtocol {
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        protocol.data = (0..18).collect();
        protocol
    }

    #[test]
    fn short_device_descriptor() {
        let mut core = MockCore::new();
        let mut protocol = device_descriptor();
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        let result = ctx.on_setup(&mut core, &mut protocol, &mut state, GET_DEVICE_DESCRIPTOR_8);
        assert_eq!(result, Ep0Result::Handled);
        assert_eq!(core.writes(ep0_in()), [(0..8).collect::<std::vec::Vec<u8>>()]);
        assert!(!state.data_callback_armed());
        assert_eq!(protocol.data_calls, 1);

        // Re-issue asks the protocol again
        ctx.on_setup(&mut core, &mut protocol, &mut state, GET_DEVICE_DESCRIPTOR_8);
        assert_eq!(protocol.data_calls, 2);
        assert_eq!(core.writes(ep0_in()).len(), 2);
    }

    #[test]
    fn short_descriptor_with_large_length() {
        let mut core = MockCore::new();
        let mut protocol = device_descriptor();
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]);
        ctx.on_setup(&mut core, &mut protocol, &mut state, setup);
        assert_eq!(core.writes(ep0_in())[0].len(), 8);
    }

    #[test]
    fn full_device_descriptor_and_status() {
        let mut core = MockCore::new();
        let mut protocol = device_descriptor();
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        ctx.on_setup(&mut core, &mut protocol, &mut state, GET_DEVICE_DESCRIPTOR);
        assert_eq!(ctx.stage(), ControlStage::DataIn);
        assert!(state.data_callback_armed());
        assert_eq!(core.writes(ep0_in())[0].len(), 18);

        // Data sent, host acknowledges
        ctx.on_in(&mut core, &mut state);
        assert_eq!(ctx.stage(), ControlStage::StatusPending);
        assert!(core.calls.contains(&Call::RequestRead(ep0_out(), 0)));
        ctx.on_out(&mut core, &mut protocol, &mut state);
        assert_eq!(ctx.stage(), ControlStage::Idle);
        assert!(!state.data_callback_armed());
    }

    #[test]
    fn multi_packet_data_in_with_zlp() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        protocol.data = std::vec![0xAB; 128];
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        // GET_DESCRIPTOR(Configuration), 255 bytes
        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xFF, 0x00]);
        ctx.on_setup(&mut core, &mut protocol, &mut state, setup);
        ctx.on_in(&mut core, &mut state);
        ctx.on_in(&mut core, &mut state);
        assert_eq!(ctx.stage(), ControlStage::DataIn);
        ctx.on_in(&mut core, &mut state);
        assert_eq!(ctx.stage(), ControlStage::StatusPending);

        let sizes: std::vec::Vec<usize> = core.writes(ep0_in()).iter().map(|w| w.len()).collect();
        assert_eq!(sizes, [64, 64, 0]);
    }

    #[test]
    fn response_truncated_to_host_length() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        protocol.data = std::vec![1; 100];
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 9, 0x00]);
        ctx.on_setup(&mut core, &mut protocol, &mut state, setup);
        ctx.on_in(&mut core, &mut state);
        assert_eq!(core.writes(ep0_in()), [std::vec![1; 9]]);
        assert_eq!(ctx.stage(), ControlStage::StatusPending);
    }

    #[test]
    fn stall() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Stall);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        let result = ctx.on_setup(&mut core, &mut protocol, &mut state, GET_DEVICE_DESCRIPTOR);
        assert_eq!(result, Ep0Result::Unhandled);
        assert_eq!(ctx.stage(), ControlStage::Idle);
        assert!(core.calls.contains(&Call::Stall(ep0_in())));
        assert!(core.writes(ep0_in()).is_empty());
        assert_eq!(protocol.data_calls, 0);
    }

    #[test]
    fn address() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Address);
        let mut state = ControllerState::new();
        state.tracker.attach();
        state.tracker.reset();
        let mut ctx = ControlTransferContext::new();

        let result = ctx.on_setup(&mut core, &mut protocol, &mut state, SET_ADDRESS);
        assert_eq!(result, Ep0Result::Unhandled);
        assert_eq!(state.address(), 0x2A);
        assert_eq!(state.device_state(), DeviceState::Address);
        assert!(core.calls.contains(&Call::SetAddress(0x2A)));
        assert_eq!(protocol.states, [DeviceState::Address]);
    }

    #[test]
    fn done_sends_status() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Done);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        let setup = SetupPacket::from_bytes([0x00, 0x03, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        ctx.on_setup(&mut core, &mut protocol, &mut state, setup);
        assert_eq!(ctx.stage(), ControlStage::NoData);
        assert_eq!(core.writes(ep0_in()), [std::vec![]]);
        ctx.on_in(&mut core, &mut state);
        assert_eq!(ctx.stage(), ControlStage::Idle);
        assert!(!ctx.take_configured());
    }

    #[test]
    fn status_means_handler_finished() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Status);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        ctx.on_setup(&mut core, &mut protocol, &mut state, SET_CONFIGURATION);
        assert_eq!(ctx.stage(), ControlStage::Idle);
        assert!(core.writes(ep0_in()).is_empty());
    }

    #[test]
    fn configuration_after_status() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Configuration);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        ctx.on_setup(&mut core, &mut protocol, &mut state, SET_CONFIGURATION);
        assert!(!ctx.take_configured());
        ctx.on_in(&mut core, &mut state);
        assert!(ctx.take_configured());
        assert!(!ctx.take_configured());
    }

    #[test]
    fn data_out_stage() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        ctx.on_setup(&mut core, &mut protocol, &mut state, SET_LINE_CODING);
        assert_eq!(ctx.stage(), ControlStage::DataOut);
        assert!(core.calls.contains(&Call::RequestRead(ep0_out(), 7)));

        core.receive(ep0_out(), &[0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08]);
        ctx.on_out(&mut core, &mut protocol, &mut state);
        assert_eq!(protocol.out, [std::vec![0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08]]);
        assert_eq!(ctx.stage(), ControlStage::StatusPending);
        assert_eq!(core.writes(ep0_in()), [std::vec![]]);

        ctx.on_in(&mut core, &mut state);
        assert_eq!(ctx.stage(), ControlStage::Idle);
    }

    #[test]
    fn deferred_status_after_multi_packet_data_out() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();
        // Nothing to defer yet
        assert!(!ctx.defer_status());

        let mut setup = SET_LINE_CODING;
        setup.length = 100;
        ctx.on_setup(&mut core, &mut protocol, &mut state, setup);
        assert!(ctx.defer_status());

        core.receive(ep0_out(), &[1; 64]);
        assert_eq!(ctx.on_out(&mut core, &mut protocol, &mut state), Ep0Result::Handled);
        assert_eq!(ctx.stage(), ControlStage::DataOut);
        assert!(core.calls.contains(&Call::RequestRead(ep0_out(), 36)));
        assert!(protocol.out.is_empty());

        core.receive(ep0_out(), &[2; 36]);
        assert_eq!(ctx.on_out(&mut core, &mut protocol, &mut state), Ep0Result::Handled);
        assert_eq!(protocol.out.len(), 1);
        assert_eq!(protocol.out[0].len(), 100);
        assert_eq!(ctx.stage(), ControlStage::StatusPending);
        assert!(core.writes(ep0_in()).is_empty());

        // Whoever took the status stage sent it
        ctx.on_in(&mut core, &mut state);
        assert_eq!(ctx.stage(), ControlStage::Idle);
    }

    #[test]
    fn data_out_rejected() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        protocol.out_status = ControlStatus::Stall;
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        ctx.on_setup(&mut core, &mut protocol, &mut state, SET_LINE_CODING);
        core.receive(ep0_out(), &[0; 7]);
        assert_eq!(ctx.on_out(&mut core, &mut protocol, &mut state), Ep0Result::Unhandled);
        assert!(core.calls.contains(&Call::Stall(ep0_out())));
        assert_eq!(ctx.stage(), ControlStage::Idle);
    }

    #[test]
    fn setup_restarts_transfer() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Data);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        ctx.on_setup(&mut core, &mut protocol, &mut state, SET_LINE_CODING);
        assert_eq!(ctx.stage(), ControlStage::DataOut);

        protocol.data = (0..18).collect();
        ctx.on_setup(&mut core, &mut protocol, &mut state, GET_DEVICE_DESCRIPTOR);
        assert_eq!(ctx.stage(), ControlStage::DataIn);
        assert_eq!(ctx.setup(), Some(&GET_DEVICE_DESCRIPTOR));
    }

    #[test]
    fn stray_events() {
        let mut core = MockCore::new();
        let mut protocol = MockProtocol::responding(ControlStatus::Done);
        let mut state = ControllerState::new();
        let mut ctx = ControlTransferContext::new();

        assert_eq!(ctx.on_in(&mut core, &mut state), Ep0Result::Unhandled);
        assert_eq!(ctx.on_out(&mut core, &mut protocol, &mut state), Ep0Result::Unhandled);
        assert_eq!(ctx.on_out_nak(&mut core), Ep0Result::Unhandled);
        assert!(core.calls.is_empty());
    }
}
