//! The transfer engine
//!
//! `Driver` ties the pieces together. It routes controller events to the
//! EP0 state machine or to the bulk / interrupt endpoints, tracks the device
//! state, and owns the driver's side of every endpoint queue.

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection, UsbError,
};

use crate::{
    control::{ControlStage, ControlTransferContext, Ep0Event, Ep0Handler, Ep0Result, Protocol},
    descriptor::{EndpointConfig, EndpointDescriptors},
    endpoint::{Endpoint, Queue, Received},
    frame::{Framing, WIRE_PROTOCOL},
    queue::{Consumer, PacketQueue, Producer},
    setup::SetupPacket,
    state::{ControllerState, DeviceState},
    transfer::{flush_policy, Flush, TransmitBuffer},
    usbcore::{ep0_in, ep0_out, Event, UsbCore},
    MAX_ENDPOINTS, MAX_INTERFACES, MAX_PACKET_SIZE, PACKET_SIZE, VALID_PACKET_SIZES,
};

/// Returns the endpoint at `addr`, if it's configured in that direction
fn slot<'s, 'a>(
    endpoints: &'s mut [Option<Endpoint<'a>>],
    addr: EndpointAddress,
) -> Option<&'s mut Endpoint<'a>> {
    endpoints
        .get_mut(addr.index())?
        .as_mut()
        .filter(|ep| ep.address() == addr)
}

/// A USB transfer engine for one USB core
///
/// After you create a `Driver` with [`new()`](Driver::new), you must
///
/// - call [`initialize()`](Driver::initialize) once, supplying the endpoint
///   configuration and one [`PacketQueue`] per endpoint
/// - take the application's side of each queue with
///   [`take_producer()`](Driver::take_producer) and
///   [`take_consumer()`](Driver::take_consumer)
/// - forward every controller event to [`on_event()`](Driver::on_event)
///
/// Endpoint numbers identify endpoints; each endpoint number is either IN
/// or OUT, never both.
pub struct Driver<'a, P> {
    protocol: P,
    state: ControllerState,
    control: ControlTransferContext,
    endpoints: [Option<Endpoint<'a>>; MAX_ENDPOINTS],
    /// Application side of IN endpoint queues, until taken.
    producers: [Option<Producer<'a>>; MAX_ENDPOINTS],
    /// Application side of OUT endpoint queues, until taken.
    consumers: [Option<Consumer<'a>>; MAX_ENDPOINTS],
    transmit: TransmitBuffer,
    scratch: [u8; MAX_PACKET_SIZE],
    framing: Option<&'a dyn Framing>,
    dropped: usize,
    initialized: bool,
}

impl<'a, P: Protocol> Driver<'a, P> {
    /// Create a driver that dispatches control requests to `protocol`
    ///
    /// The transmit path holds [`WireProtocol`](crate::WireProtocol) frames
    /// until they're complete. Change this with
    /// [`set_framing()`](Driver::set_framing).
    pub fn new(protocol: P) -> Self {
        Driver {
            protocol,
            state: ControllerState::new(),
            control: ControlTransferContext::new(),
            endpoints: core::array::from_fn(|_| None),
            producers: core::array::from_fn(|_| None),
            consumers: core::array::from_fn(|_| None),
            transmit: TransmitBuffer::new(),
            scratch: [0; MAX_PACKET_SIZE],
            framing: Some(&WIRE_PROTOCOL),
            dropped: 0,
            initialized: false,
        }
    }

    /// Set the framing that the transmit path honors
    ///
    /// `None` sends queued data as soon as possible.
    pub fn set_framing(&mut self, framing: Option<&'a dyn Framing>) {
        self.framing = framing;
    }

    fn validate<const N: usize>(
        endpoints: &[EndpointConfig],
        queues: &[PacketQueue<N>],
    ) -> usb_device::Result<()> {
        if endpoints.len() > queues.len() {
            return Err(UsbError::EndpointOverflow);
        }
        for (idx, config) in endpoints.iter().enumerate() {
            let number = config.address.index();
            if number == 0 || number >= MAX_ENDPOINTS {
                return Err(UsbError::InvalidEndpoint);
            }
            if endpoints[..idx].iter().any(|other| other.address.index() == number) {
                return Err(UsbError::InvalidEndpoint);
            }
            if usize::from(config.interface) >= MAX_INTERFACES {
                return Err(UsbError::InvalidEndpoint);
            }
            match config.kind {
                EndpointType::Bulk | EndpointType::Interrupt => {}
                _ => return Err(UsbError::Unsupported),
            }
            if !VALID_PACKET_SIZES.contains(&config.max_packet_size) {
                return Err(UsbError::InvalidEndpoint);
            }
            // A max-size OUT packet must fit in its queue.
            let packets = usize::from(config.max_packet_size).div_ceil(PACKET_SIZE);
            if config.address.direction() == UsbDirection::Out && packets > N {
                return Err(UsbError::EndpointMemoryOverflow);
            }
        }
        Ok(())
    }

    /// Configure the endpoints, and connect to the bus
    ///
    /// Each endpoint takes the next queue from `queues`, in order. Returns
    /// an error, without changing anything, if an endpoint can't be
    /// supported. See [`UsbError`] for the specific causes.
    pub fn initialize<C: UsbCore, const N: usize>(
        &mut self,
        core: &mut C,
        endpoints: &[EndpointConfig],
        queues: &'a mut [PacketQueue<N>],
    ) -> usb_device::Result<()> {
        if self.initialized {
            return Err(UsbError::InvalidState);
        }
        Self::validate(endpoints, queues)?;

        for (config, queue) in endpoints.iter().zip(queues) {
            let number = config.address.index();
            let (producer, consumer) = queue.split();
            let queue = match config.address.direction() {
                UsbDirection::In => {
                    self.producers[number] = Some(producer);
                    Queue::Transmit(consumer)
                }
                UsbDirection::Out => {
                    self.consumers[number] = Some(consumer);
                    Queue::Receive(producer)
                }
            };
            debug!(
                "EP{} {:?} {:?} max_packet_size={} interface={}",
                number,
                config.address.direction(),
                config.kind,
                config.max_packet_size,
                config.interface
            );
            self.endpoints[number] = Some(Endpoint::new(config, queue));
        }

        self.state = ControllerState::new();
        self.control.reset();
        self.transmit.clear();
        self.dropped = 0;
        self.initialized = true;

        core.enable_endpoint(ep0_out());
        core.enable_endpoint(ep0_in());
        self.protect(core, false);
        Ok(())
    }

    /// Configure the endpoints found in a configuration descriptor
    ///
    /// See [`initialize()`](Driver::initialize) for details.
    pub fn initialize_from_descriptor<C: UsbCore, const N: usize>(
        &mut self,
        core: &mut C,
        configuration: &[u8],
        queues: &'a mut [PacketQueue<N>],
    ) -> usb_device::Result<()> {
        let placeholder = EndpointConfig::new(EndpointAddress::from(0u8), EndpointType::Bulk, 0);
        let mut endpoints = [placeholder; MAX_ENDPOINTS];
        let mut count = 0;
        for config in EndpointDescriptors::new(configuration) {
            let entry = endpoints.get_mut(count).ok_or(UsbError::EndpointOverflow)?;
            *entry = config?;
            count += 1;
        }
        self.initialize(core, &endpoints[..count], queues)
    }

    /// Disconnect from the bus, and release every endpoint
    ///
    /// Queue handles that the application took remain valid, but the
    /// driver no longer services them.
    pub fn uninitialize<C: UsbCore>(&mut self, core: &mut C) -> usb_device::Result<()> {
        if !self.initialized {
            return Err(UsbError::InvalidState);
        }
        core.connect(false);
        for ep in self.endpoints.iter_mut().flatten() {
            core.disable_endpoint(ep.address());
        }
        core.disable_endpoint(ep0_out());
        core.disable_endpoint(ep0_in());

        self.endpoints = core::array::from_fn(|_| None);
        self.producers = core::array::from_fn(|_| None);
        self.consumers = core::array::from_fn(|_| None);
        self.control.reset();
        self.transmit.clear();
        self.state.clear_halts();
        self.state.address = 0;
        self.state.configuration = 0;
        self.notify(|state| state.tracker.detach());
        self.initialized = false;
        Ok(())
    }

    /// Take the application's side of an IN endpoint queue
    ///
    /// Returns `None` if `addr` isn't a configured IN endpoint, or if the
    /// producer was already taken.
    pub fn take_producer(&mut self, addr: EndpointAddress) -> Option<Producer<'a>> {
        slot(&mut self.endpoints, addr).filter(|ep| ep.is_transmit())?;
        self.producers.get_mut(addr.index())?.take()
    }

    /// Take the application's side of an OUT endpoint queue
    ///
    /// Returns `None` if `addr` isn't a configured OUT endpoint, or if the
    /// consumer was already taken.
    pub fn take_consumer(&mut self, addr: EndpointAddress) -> Option<Consumer<'a>> {
        slot(&mut self.endpoints, addr).filter(|ep| !ep.is_transmit())?;
        self.consumers.get_mut(addr.index())?.take()
    }

    /// Handle an event from the controller
    ///
    /// Call this from the USB interrupt. It never blocks.
    pub fn on_event<C: UsbCore>(&mut self, core: &mut C, event: Event) {
        if !self.initialized {
            return;
        }
        if let Some(ep0) = event.control() {
            self.on_ep0(core, ep0);
            return;
        }
        match event {
            Event::Reset => self.on_reset(core),
            Event::Suspend => {
                debug!("SUSPEND");
                self.notify(|state| state.tracker.suspend());
            }
            Event::Resume => {
                debug!("RESUME");
                self.notify(|state| state.tracker.resume());
            }
            Event::In(number) => self.on_in(core, number),
            Event::Out(number) => self.on_out(core, number),
            Event::OutNak(number) => self.on_out_nak(core, number),
            Event::Setup(_) => {}
        }
    }

    /// Apply a state transition, and tell the protocol about it
    fn notify(&mut self, transition: impl FnOnce(&mut ControllerState) -> Option<DeviceState>) {
        if let Some(next) = transition(&mut self.state) {
            debug!("Device state {:?}", next);
            self.protocol.state_changed(next);
        }
    }

    fn on_reset<C: UsbCore>(&mut self, core: &mut C) {
        debug!("RESET");
        self.control.reset();
        self.transmit.clear();
        self.state.clear_halts();
        self.state.address = 0;
        self.state.configuration = 0;
        self.state.data_callback_armed = false;

        core.reset_endpoint(ep0_out());
        core.reset_endpoint(ep0_in());
        for ep in self.endpoints.iter_mut().flatten() {
            ep.reset(core);
        }
        self.notify(|state| state.tracker.reset());
    }

    /// Transmit queued data on an IN endpoint
    ///
    /// Returns `false` if `addr` isn't a configured IN endpoint, if the device
    /// isn't configured, if another transfer is in flight, or if the queue
    /// holds an incomplete frame. Try again later; the driver also retries
    /// on its own when the in-flight transfer finishes.
    ///
    /// If the endpoint is halted, the queue is discarded, and this returns
    /// `true`.
    pub fn start_output<C: UsbCore>(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        if self.state.device_state() != DeviceState::Configured {
            return false;
        }
        let Some(queue) = slot(&mut self.endpoints, addr).and_then(Endpoint::consumer) else {
            return false;
        };
        if self.state.is_halted(addr.index() as u8) {
            debug!("EP{} IN halted; dropping {} packets", addr.index(), queue.len());
            queue.clear();
            return true;
        }
        if self.transmit.is_busy() {
            return false;
        }
        let flush = flush_policy(queue, self.framing);
        if flush != Flush::Ready {
            trace!("EP{} IN holding frame: {:?}", addr.index(), flush);
            return false;
        }
        if self.transmit.fill(queue) == 0 {
            return true;
        }
        trace!("EP{} IN start", addr.index());
        self.transmit.start(core, addr);
        true
    }

    /// Start output on every IN endpoint with queued data, starting after
    /// endpoint number `after`
    fn flush_pending<C: UsbCore>(&mut self, core: &mut C, after: usize) {
        for offset in 1..=MAX_ENDPOINTS {
            if self.transmit.is_busy() {
                break;
            }
            let number = (after + offset) % MAX_ENDPOINTS;
            let pending = self.endpoints[number]
                .as_ref()
                .filter(|ep| ep.has_pending_output())
                .map(Endpoint::address);
            if let Some(addr) = pending {
                self.start_output(core, addr);
            }
        }
    }

    fn on_in<C: UsbCore>(&mut self, core: &mut C, number: u8) {
        let addr = EndpointAddress::from_parts(usize::from(number), UsbDirection::In);
        if self.transmit.on_complete(core, addr) {
            return;
        }
        self.flush_pending(core, usize::from(number));
    }

    fn on_out<C: UsbCore>(&mut self, core: &mut C, number: u8) {
        let addr = EndpointAddress::from_parts(usize::from(number), UsbDirection::Out);
        let halted = self.state.is_halted(number);
        let Some(ep) = slot(&mut self.endpoints, addr) else {
            return;
        };
        match ep.receive(core, &mut self.scratch) {
            Received::Queued => {
                trace!("EP{} OUT queued", number);
            }
            Received::Dropped => {
                self.dropped = self.dropped.wrapping_add(1);
                warn!("EP{} OUT queue full; packet dropped", number);
            }
            Received::Empty => {}
        }
        if !halted {
            ep.arm(core);
        }
    }

    fn on_out_nak<C: UsbCore>(&mut self, core: &mut C, number: u8) {
        let addr = EndpointAddress::from_parts(usize::from(number), UsbDirection::Out);
        if self.state.is_halted(number) {
            return;
        }
        if let Some(ep) = slot(&mut self.endpoints, addr) {
            ep.arm(core);
        }
    }

    /// Enable an OUT endpoint, and get ready to receive
    ///
    /// Returns `false` if `addr` isn't a configured OUT endpoint.
    pub fn rx_enable<C: UsbCore>(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        let halted = self.state.is_halted(addr.index() as u8);
        let Some(ep) = slot(&mut self.endpoints, addr).filter(|ep| !ep.is_transmit()) else {
            return false;
        };
        core.enable_endpoint(addr);
        if !halted {
            ep.arm(core);
        }
        true
    }

    /// Halt (`true`) or resume (`false`) an endpoint
    ///
    /// Returns `false` if `addr` isn't a configured endpoint.
    pub fn set_halted<C: UsbCore>(&mut self, core: &mut C, addr: EndpointAddress, halted: bool) -> bool {
        if slot(&mut self.endpoints, addr).is_none() {
            return false;
        }
        self.state.set_halted(addr.index() as u8, halted);
        self.reconcile_halts(core);
        true
    }

    /// Indicates if the endpoint is halted
    pub fn is_halted(&self, addr: EndpointAddress) -> bool {
        self.state.is_halted(addr.index() as u8)
    }

    /// Apply endpoint halt changes to the hardware
    fn reconcile_halts<C: UsbCore>(&mut self, core: &mut C) {
        let configured = self.state.device_state() == DeviceState::Configured;
        for ep in self.endpoints.iter_mut().flatten() {
            let halted = self.state.is_halted(ep.number());
            if halted == ep.is_stalled() {
                continue;
            }
            debug!("EP{} halt={}", ep.number(), halted);
            ep.set_stalled(core, halted);
            if halted {
                if self.transmit.owner() == Some(ep.address()) {
                    self.transmit.clear();
                }
            } else if configured {
                ep.arm(core);
            }
        }
    }

    /// The host selected a configuration
    fn on_configured<C: UsbCore>(&mut self, core: &mut C) {
        self.notify(|state| state.tracker.configure());
        for ep in self.endpoints.iter_mut().flatten() {
            core.enable_endpoint(ep.address());
            ep.disarm();
            if !self.state.is_halted(ep.number()) {
                ep.arm(core);
            }
        }
        // Hosts often finish enumerating after the application queued data.
        self.flush_pending(core, 0);
    }

    /// Protect (`true`) or release (`false`) the bus
    ///
    /// Protecting drops all queued transmit data. Releasing connects to the
    /// bus.
    pub fn protect<C: UsbCore>(&mut self, core: &mut C, on: bool) {
        if on {
            for ep in self.endpoints.iter_mut().flatten() {
                if let Some(queue) = ep.consumer() {
                    queue.clear();
                }
            }
        } else {
            core.connect(true);
            self.notify(|state| state.tracker.attach());
        }
    }

    /// Indicates if the driver is servicing the bus
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The current device state
    pub fn device_state(&self) -> DeviceState {
        self.state.device_state()
    }

    /// The state shared with the protocol
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Where EP0 is in a control transfer
    pub fn control_stage(&self) -> ControlStage {
        self.control.stage()
    }

    /// The request of the in-flight control transfer
    pub fn control_request(&self) -> Option<&SetupPacket> {
        self.control.setup()
    }

    /// The number of OUT packets dropped because their queue was full
    pub fn dropped_packets(&self) -> usize {
        self.dropped
    }

    /// The upper protocol layer
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// The upper protocol layer, mutably
    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }
}

impl<C: UsbCore, P: Protocol> Ep0Handler<C> for Driver<'_, P> {
    fn on_ep0(&mut self, core: &mut C, event: Ep0Event) -> Ep0Result {
        let result = match event {
            Ep0Event::Setup(setup) => {
                let result = self
                    .control
                    .on_setup(core, &mut self.protocol, &mut self.state, setup);
                self.reconcile_halts(core);
                result
            }
            Ep0Event::In => self.control.on_in(core, &mut self.state),
            Ep0Event::Out => self
                .control
                .on_out(core, &mut self.protocol, &mut self.state),
            Ep0Event::OutNak => self.control.on_out_nak(core),
        };
        if self.control.take_configured() {
            self.on_configured(core);
        }
        result
    }

    fn control_stage(&self) -> ControlStage {
        self.control.stage()
    }

    fn defer_status(&mut self) -> bool {
        self.control.defer_status()
    }
}
