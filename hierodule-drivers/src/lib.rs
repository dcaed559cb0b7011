//! Bus strategies for the Hierodule transfer engine
//!
//! Each module adapts one peripheral's register block to
//! [`hierodule_core::BusProtocol`]; the shared [`hierodule_core::Driver`]
//! supplies descriptors, the receive ring and timeouts. [`port`] exposes
//! the drivers through the embedded-hal and embedded-io blocking traits.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod log;

pub mod i2c;
pub mod port;
pub mod spi;
pub mod usart;

pub use i2c::{I2c, I2cDriver, I2cMaster};
pub use port::{I2cPort, Port, PortError, SerialPort, SpiPort};
pub use spi::{Spi, SpiDriver};
pub use usart::{Usart, UsartDriver};
