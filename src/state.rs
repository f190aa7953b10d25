//! Device state tracking, and the state shared with the upper layer

use bitflags::bitflags;

use crate::MAX_ENDPOINTS;

/// The USB device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Not connected to the bus
    #[default]
    Detached,
    /// Connected, but not yet reset by the host
    Attached,
    /// Reset, responding on the default address
    Default,
    /// Responding on an assigned address
    Address,
    /// The host selected a configuration
    Configured,
    /// The bus is idle
    Suspended,
}

/// Drives the [`DeviceState`] transitions
///
/// Every transition returns the new state if the state changed, so that
/// the caller can notify the upper layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStateTracker {
    state: DeviceState,
    /// Restored on resume.
    suspended_from: DeviceState,
}

impl DeviceStateTracker {
    pub const fn new() -> Self {
        DeviceStateTracker {
            state: DeviceState::Detached,
            suspended_from: DeviceState::Detached,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    fn transition(&mut self, next: DeviceState) -> Option<DeviceState> {
        if self.state == next {
            None
        } else {
            self.state = next;
            Some(next)
        }
    }

    /// The device connected to the bus
    pub fn attach(&mut self) -> Option<DeviceState> {
        self.transition(DeviceState::Attached)
    }

    /// The device left the bus
    pub fn detach(&mut self) -> Option<DeviceState> {
        self.suspended_from = DeviceState::Detached;
        self.transition(DeviceState::Detached)
    }

    /// The host reset the bus
    pub fn reset(&mut self) -> Option<DeviceState> {
        self.suspended_from = DeviceState::Default;
        self.transition(DeviceState::Default)
    }

    /// The host assigned an address
    pub fn address(&mut self) -> Option<DeviceState> {
        self.transition(DeviceState::Address)
    }

    /// The host selected a configuration
    pub fn configure(&mut self) -> Option<DeviceState> {
        self.transition(DeviceState::Configured)
    }

    /// The bus went idle
    ///
    /// A second suspend doesn't overwrite the state that resume restores.
    pub fn suspend(&mut self) -> Option<DeviceState> {
        if self.state != DeviceState::Suspended {
            self.suspended_from = self.state;
        }
        self.transition(DeviceState::Suspended)
    }

    /// The bus left suspend
    ///
    /// Restores the state from before the suspend. Does nothing if
    /// the device isn't suspended.
    pub fn resume(&mut self) -> Option<DeviceState> {
        if self.state == DeviceState::Suspended {
            self.transition(self.suspended_from)
        } else {
            None
        }
    }
}

bitflags! {
    /// Per-endpoint status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EndpointStatus: u8 {
        /// The endpoint is halted, and stalls every transaction
        const HALT = 1 << 0;
    }
}

/// Controller state visible to the upper layer
///
/// The upper layer receives this state when it handles a control request.
/// It may set and clear endpoint halts, typically while handling
/// SET_FEATURE and CLEAR_FEATURE requests. After the request, the driver
/// applies halt changes to the hardware.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub(crate) tracker: DeviceStateTracker,
    pub(crate) address: u8,
    /// The active configuration value, maintained by the upper layer
    pub configuration: u8,
    endpoint_status: [EndpointStatus; MAX_ENDPOINTS],
    /// Set while the upper layer's data callback may supply an EP0 response
    pub(crate) data_callback_armed: bool,
}

impl ControllerState {
    pub const fn new() -> Self {
        ControllerState {
            tracker: DeviceStateTracker::new(),
            address: 0,
            configuration: 0,
            endpoint_status: [EndpointStatus::empty(); MAX_ENDPOINTS],
            data_callback_armed: false,
        }
    }

    /// The current device state
    pub fn device_state(&self) -> DeviceState {
        self.tracker.state()
    }

    /// The device address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Status of endpoint number `ep`
    ///
    /// Out of range endpoints report an empty status.
    pub fn endpoint_status(&self, ep: u8) -> EndpointStatus {
        self.endpoint_status
            .get(usize::from(ep))
            .copied()
            .unwrap_or_default()
    }

    /// Indicates if endpoint number `ep` is halted
    pub fn is_halted(&self, ep: u8) -> bool {
        self.endpoint_status(ep).contains(EndpointStatus::HALT)
    }

    /// Halt (`true`) or resume (`false`) endpoint number `ep`
    ///
    /// Returns `false` if `ep` is out of range.
    pub fn set_halted(&mut self, ep: u8, halted: bool) -> bool {
        match self.endpoint_status.get_mut(usize::from(ep)) {
            Some(status) => {
                status.set(EndpointStatus::HALT, halted);
                true
            }
            None => false,
        }
    }

    /// Indicates if an EP0 data callback is pending
    pub fn data_callback_armed(&self) -> bool {
        self.data_callback_armed
    }

    /// Forget every endpoint halt
    pub(crate) fn clear_halts(&mut self) {
        self.endpoint_status = [EndpointStatus::empty(); MAX_ENDPOINTS];
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}
