//! CDC class request acknowledgement

use usb_device::{control::{Recipient, RequestType}, UsbDirection};

use crate::{
    control::{ControlStage, Ep0Event, Ep0Handler, Ep0Result, Protocol},
    driver::Driver,
    setup::SetupPacket,
    usbcore::{ep0_in, Event, UsbCore},
};

/// Acknowledges CDC class requests after another EP0 handler consumes them
///
/// Some stacks never send the status stage of SET_LINE_CODING, and similar
/// class requests sent to a CDC interface. `CdcShim` wraps an EP0 handler
/// and, once the wrapped handler consumes the whole data stage of a
/// host-to-device class request addressed to the control or data interface,
/// sends the zero-length status packet itself. Everything else passes
/// through.
///
/// The shim asks the wrapped handler to leave these status stages alone with
/// [`Ep0Handler::defer_status`], so exactly one status packet goes out. A
/// wrapped [`Driver`](crate::Driver) honors the request.
pub struct CdcShim<H> {
    inner: H,
    control_interface: u8,
    data_interface: u8,
    setup: Option<SetupPacket>,
    acknowledged: bool,
}

impl<H> CdcShim<H> {
    /// Wrap `inner`, watching for requests to the two CDC interfaces
    pub fn new(inner: H, control_interface: u8, data_interface: u8) -> Self {
        CdcShim {
            inner,
            control_interface,
            data_interface,
            setup: None,
            acknowledged: false,
        }
    }

    /// The wrapped handler
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// The wrapped handler, mutably
    pub fn inner_mut(&mut self) -> &mut H {
        &mut self.inner
    }

    /// Release the wrapped handler
    pub fn into_inner(self) -> H {
        self.inner
    }

    fn is_cdc_request(&self, setup: &SetupPacket) -> bool {
        setup.kind() == RequestType::Class
            && setup.recipient() == Recipient::Interface
            && setup.direction() == UsbDirection::Out
            && [self.control_interface, self.data_interface].contains(&setup.interface_number())
    }
}

impl<C: UsbCore, H: Ep0Handler<C>> Ep0Handler<C> for CdcShim<H> {
    fn on_ep0(&mut self, core: &mut C, event: Ep0Event) -> Ep0Result {
        if let Ep0Event::Setup(setup) = event {
            self.setup = Some(setup);
            self.acknowledged = false;
        }

        let result = self.inner.on_ep0(core, event);
        if result != Ep0Result::Handled {
            return result;
        }
        if !self.setup.is_some_and(|setup| self.is_cdc_request(&setup)) {
            return result;
        }

        match event {
            Ep0Event::Setup(_) => {
                self.inner.defer_status();
            }
            Ep0Event::Out
                if !self.acknowledged && self.inner.control_stage() != ControlStage::DataOut =>
            {
                debug!(
                    "CDC status IN for interface {}",
                    self.setup.map_or(0, |setup| setup.interface_number())
                );
                core.write_endpoint(ep0_in(), &[]);
                self.acknowledged = true;
            }
            _ => {}
        }
        result
    }

    fn control_stage(&self) -> ControlStage {
        self.inner.control_stage()
    }
}

impl<'a, P: Protocol> CdcShim<Driver<'a, P>> {
    /// Handle an event from the controller
    ///
    /// EP0 events pass through the shim. Everything else goes straight to
    /// [`Driver::on_event`].
    pub fn on_event<C: UsbCore>(&mut self, core: &mut C, event: Event) {
        match event.control() {
            Some(ep0) if self.inner.is_initialized() => {
                Ep0Handler::on_ep0(self, core, ep0);
            }
            _ => self.inner.on_event(core, event),
        }
    }
}
