//! Board-agnostic transfer engine
//!
//! This crate contains the interrupt-driven machinery shared by every
//! communication peripheral, independent of any register layout:
//!
//! - Ring buffer for ISR/application byte exchange
//! - Transfer descriptors and their state machine
//! - Generic bus driver engine with a pluggable framing strategy
//! - Peripheral-scoped ownership cell with blocking and async waits
//! - Interrupt vector dispatch table
//! - Error types

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod log;

pub mod cell;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ring;
pub mod state;
pub mod transfer;

pub use cell::Shared;
pub use dispatch::{DispatchTable, InterruptHandler, Vector};
pub use engine::{BusEvent, BusProtocol, Driver, Listener, Notice};
pub use error::{Error, Fault, Result};
pub use ring::RingBuffer;
pub use state::{Phase, TransferEvent, TransferState};
pub use transfer::{Callback, Direction, Handle, TransferDescriptor, TransferStatus};

/// A driver instance as seen from its interrupt handler and waiters
///
/// Implemented by the bus [`Driver`] and by the USB device driver, so a
/// [`Shared`] cell can service and wait on either.
pub trait PeripheralDriver {
    /// Service the peripheral's interrupt
    fn on_interrupt(&mut self);

    /// Expire transfers whose timeout elapsed by tick `now`
    fn on_tick(&mut self, now: u32);

    /// Progress of a transfer
    fn status(&self, handle: Handle) -> Result<TransferStatus>;

    /// Cancel a transfer
    fn cancel(&mut self, handle: Handle) -> Result<()>;
}
