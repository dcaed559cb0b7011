//! Hierodule Hardware Abstraction Layer
//!
//! This crate defines the register-level traits that chip-specific code
//! implements so the transfer engine can drive a peripheral without
//! knowing its bit-field layout. It also defines the collaborators the
//! engine consumes from the rest of the system: a time base, the
//! peripheral's interrupt line, and a low-power idle primitive.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application                            │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hierodule-drivers / hierodule-usb      │
//! │  (per-peripheral framing strategies)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hierodule-core (transfer engine)       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hierodule-hal (this crate - traits)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//!          chip register implementations
//! ```
//!
//! # Traits
//!
//! - [`uart::UsartRegisters`] - USART data/status/interrupt-enable access
//! - [`spi::SpiRegisters`] - SPI data/status/interrupt-enable access
//! - [`i2c::I2cRegisters`] - I2C data/status/bus-condition access
//! - [`usb::UsbRegisters`] - USB endpoint buffers and event flags
//! - [`time::TimeBase`] - Tick source from the timer module
//! - [`irq::InterruptLine`], [`irq::Idle`] - Interrupt masking and WFI

#![no_std]
#![deny(unsafe_code)]

pub mod i2c;
pub mod irq;
pub mod spi;
pub mod time;
pub mod uart;
pub mod usb;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// Re-export key traits at crate root for convenience
pub use i2c::{I2cConfig, I2cRegisters};
pub use irq::{Idle, InterruptLine};
pub use spi::{SpiConfig, SpiRegisters};
pub use time::{TickListener, TimeBase};
pub use uart::{UartConfig, UsartRegisters};
pub use usb::{UsbConfig, UsbRegisters};

/// Order in which bits of a data unit are shifted onto the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BitOrder {
    /// Least significant bit first (USART default)
    #[default]
    LsbFirst,
    /// Most significant bit first (SPI default)
    MsbFirst,
}

/// A configuration value the hardware cannot honor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Baud rate or bus frequency of zero
    ZeroRate,
    /// Clock divider outside the supported power-of-two range
    InvalidDivider,
    /// Data width not supported with the requested framing
    UnsupportedWidth,
    /// Bit order not supported by this peripheral
    UnsupportedBitOrder,
    /// Slave address outside the 7-bit range
    InvalidAddress,
    /// Max packet size not allowed for the endpoint type
    InvalidPacketSize,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::ZeroRate => write!(f, "Rate must be non-zero"),
            ConfigError::InvalidDivider => write!(f, "Invalid clock divider"),
            ConfigError::UnsupportedWidth => write!(f, "Unsupported data width"),
            ConfigError::UnsupportedBitOrder => write!(f, "Unsupported bit order"),
            ConfigError::InvalidAddress => write!(f, "Invalid 7-bit address"),
            ConfigError::InvalidPacketSize => write!(f, "Invalid max packet size"),
        }
    }
}
