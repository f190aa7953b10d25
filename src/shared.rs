//! Sharing a driver between the USB interrupt and the application

use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use usb_device::endpoint::EndpointAddress;

use crate::{
    cdc::CdcShim,
    control::Protocol,
    driver::Driver,
    usbcore::{Event, UsbCore},
};

/// The driver operations that a [`Controller`] serializes
///
/// Implemented by [`Driver`], and by a [`CdcShim`] wrapping a `Driver`.
pub trait Service<C: UsbCore> {
    /// Handle a controller event
    fn on_event(&mut self, core: &mut C, event: Event);
    /// See [`Driver::start_output`]
    fn start_output(&mut self, core: &mut C, addr: EndpointAddress) -> bool;
    /// See [`Driver::rx_enable`]
    fn rx_enable(&mut self, core: &mut C, addr: EndpointAddress) -> bool;
    /// See [`Driver::set_halted`]
    fn set_halted(&mut self, core: &mut C, addr: EndpointAddress, halted: bool) -> bool;
}

impl<C: UsbCore, P: Protocol> Service<C> for Driver<'_, P> {
    fn on_event(&mut self, core: &mut C, event: Event) {
        Driver::on_event(self, core, event)
    }
    fn start_output(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        Driver::start_output(self, core, addr)
    }
    fn rx_enable(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        Driver::rx_enable(self, core, addr)
    }
    fn set_halted(&mut self, core: &mut C, addr: EndpointAddress, halted: bool) -> bool {
        Driver::set_halted(self, core, addr, halted)
    }
}

impl<C: UsbCore, P: Protocol> Service<C> for CdcShim<Driver<'_, P>> {
    fn on_event(&mut self, core: &mut C, event: Event) {
        CdcShim::on_event(self, core, event)
    }
    fn start_output(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        self.inner_mut().start_output(core, addr)
    }
    fn rx_enable(&mut self, core: &mut C, addr: EndpointAddress) -> bool {
        self.inner_mut().rx_enable(core, addr)
    }
    fn set_halted(&mut self, core: &mut C, addr: EndpointAddress, halted: bool) -> bool {
        self.inner_mut().set_halted(core, addr, halted)
    }
}

/// A USB core and its driver, behind a critical section
///
/// The USB interrupt calls [`on_event()`](Controller::on_event), while
/// application code calls [`start_output()`](Controller::start_output) and
/// friends. Every call runs with interrupts disabled, so the two never
/// observe a half-updated driver.
///
/// The driver is any [`Service`]: a [`Driver`], or a [`CdcShim`] wrapping
/// one. Place the `Controller` in a `static` to share it with your
/// interrupt handler.
pub struct Controller<C, S> {
    shared: Mutex<RefCell<(C, S)>>,
}

impl<C: UsbCore, S: Service<C>> Controller<C, S> {
    /// Wrap a core, and a driver that's ready to handle events
    pub fn new(core: C, service: S) -> Self {
        Controller {
            shared: Mutex::new(RefCell::new((core, service))),
        }
    }

    /// Interrupt-safe, mutable access to the core and driver
    pub fn with<R>(&self, func: impl FnOnce(&mut C, &mut S) -> R) -> R {
        interrupt::free(|cs| {
            let shared = self.shared.borrow(cs);
            let mut shared = shared.borrow_mut();
            let (core, service) = &mut *shared;
            func(core, service)
        })
    }

    /// Handle a controller event; see [`Driver::on_event`]
    pub fn on_event(&self, event: Event) {
        self.with(|core, service| service.on_event(core, event))
    }

    /// See [`Driver::start_output`]
    pub fn start_output(&self, addr: EndpointAddress) -> bool {
        self.with(|core, service| service.start_output(core, addr))
    }

    /// See [`Driver::rx_enable`]
    pub fn rx_enable(&self, addr: EndpointAddress) -> bool {
        self.with(|core, service| service.rx_enable(core, addr))
    }

    /// See [`Driver::set_halted`]
    pub fn set_halted(&self, addr: EndpointAddress, halted: bool) -> bool {
        self.with(|core, service| service.set_halted(core, addr, halted))
    }
}
