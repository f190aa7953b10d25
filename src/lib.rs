//! A device-side USB transfer engine
//!
//! `usbd-transfer` moves data between host-initiated USB transactions and
//! fixed-capacity application queues. It provides
//!
//! - [`PacketQueue`]s, wait-free single-producer, single-consumer rings that
//!   connect the USB interrupt with application code.
//! - an EP0 control transfer state machine that dispatches requests to your
//!   [`Protocol`].
//! - a bulk / interrupt transfer engine with a framing-aware transmit flush.
//!   See [`Framing`] for details.
//! - device state tracking, and a [`CdcShim`] that acknowledges CDC class
//!   requests.
//!
//! The physical controller sits behind the [`UsbCore`] trait. Implement
//! `UsbCore` for your USB peripheral, and forward its interrupts to
//! [`Driver::on_event`] as [`Event`]s.
//!
//! # Example
//!
//! ```no_run
//! use usbd_transfer::{
//!     ControlStatus, ControllerState, Driver, EndpointConfig, Event, PacketQueue, Protocol,
//!     SetupPacket, UsbCore,
//! };
//! use usb_device::{endpoint::{EndpointAddress, EndpointType}, UsbDirection};
//!
//! struct Debugger;
//! impl Protocol for Debugger {
//!     fn control(&mut self, _: &SetupPacket, _: &mut ControllerState) -> ControlStatus {
//!         ControlStatus::Stall
//!     }
//!     fn control_data(&mut self, _: &SetupPacket, _: &mut [u8]) -> usize {
//!         0
//!     }
//! }
//!
//! # fn example<C: UsbCore>(core: &mut C, next_event: impl Fn() -> Event) -> usb_device::Result<()> {
//! static mut QUEUES: [PacketQueue; 2] = [PacketQueue::new(), PacketQueue::new()];
//! let endpoints = [
//!     EndpointConfig::new(EndpointAddress::from_parts(1, UsbDirection::In), EndpointType::Bulk, 64),
//!     EndpointConfig::new(EndpointAddress::from_parts(2, UsbDirection::Out), EndpointType::Bulk, 64),
//! ];
//!
//! let mut driver = Driver::new(Debugger);
//! // Safety: only borrowed once.
//! driver.initialize(core, &endpoints, unsafe { &mut *core::ptr::addr_of_mut!(QUEUES) })?;
//!
//! let mut tx = driver.take_producer(EndpointAddress::from_parts(1, UsbDirection::In)).unwrap();
//! let mut rx = driver.take_consumer(EndpointAddress::from_parts(2, UsbDirection::Out)).unwrap();
//!
//! loop {
//!     driver.on_event(core, next_event());
//!     while let Some(packet) = rx.try_pop() {
//!         tx.try_push(&packet);
//!         driver.start_output(core, EndpointAddress::from_parts(1, UsbDirection::In));
//!     }
//! }
//! # }
//! ```
//!
//! When the USB interrupt and your application share the driver, use a
//! [`Controller`] to serialize their access.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod log;

mod cdc;
mod control;
mod descriptor;
mod driver;
mod endpoint;
mod frame;
mod packet;
mod queue;
mod setup;
mod shared;
mod state;
mod transfer;
mod usbcore;

#[cfg(test)]
mod mock;

pub use cdc::CdcShim;
pub use control::{ControlStage, ControlStatus, Ep0Event, Ep0Handler, Ep0Result, Protocol};
pub use descriptor::{EndpointConfig, EndpointDescriptors};
pub use driver::Driver;
pub use frame::{Framing, WireProtocol, WIRE_PROTOCOL};
pub use packet::Packet;
pub use queue::{Consumer, PacketQueue, Producer};
pub use setup::SetupPacket;
pub use shared::{Controller, Service};
pub use state::{ControllerState, DeviceState, DeviceStateTracker, EndpointStatus};
pub use usbcore::{Event, UsbCore};

/// Endpoint numbers are in `0..MAX_ENDPOINTS`
pub const MAX_ENDPOINTS: usize = 6;

/// Interface numbers are in `0..MAX_INTERFACES`
pub const MAX_INTERFACES: usize = 4;

/// Bytes held by a single queued [`Packet`]
pub const PACKET_SIZE: usize = 64;

/// Default [`PacketQueue`] capacity, in packets
pub const QUEUE_PACKET_COUNT: usize = 16;

/// Size of the per-core transmit staging buffer
///
/// The transmit path coalesces queued packets into this buffer
/// before handing them to the core.
pub const TX_BUFFER_SIZE: usize = 2048;

/// Size of the EP0 data stage buffer
pub const CONTROL_BUFFER_SIZE: usize = 512;

/// EP0 max packet size
pub const EP0_MAX_PACKET_SIZE: usize = 64;

/// Max packet sizes accepted for non-control endpoints
pub const VALID_PACKET_SIZES: [u16; 7] = [8, 16, 32, 64, 128, 256, 512];

/// The largest max packet size of a non-control endpoint
///
/// An OUT packet larger than [`PACKET_SIZE`] occupies several queued
/// [`Packet`]s.
pub const MAX_PACKET_SIZE: usize = 512;

// A full packet must fit in the staging buffer, and the staging buffer
// must hold whole packets.
const _: [(); 1] = [(); (TX_BUFFER_SIZE % PACKET_SIZE == 0 && TX_BUFFER_SIZE >= PACKET_SIZE) as usize];
const _: [(); 1] = [(); (CONTROL_BUFFER_SIZE >= EP0_MAX_PACKET_SIZE) as usize];
const _: [(); 1] = [(); (VALID_PACKET_SIZES[6] as usize == MAX_PACKET_SIZE) as usize];
