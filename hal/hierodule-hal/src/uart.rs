//! USART register abstractions
//!
//! Provides the register-level operations the transfer engine needs to
//! run an interrupt-driven USART, plus the frame configuration applied
//! by `configure`.

use crate::{BitOrder, ConfigError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// USART register access
///
/// Implementations wrap one physical USART unit. Every method is called
/// either from the owning driver's interrupt handler or with that
/// interrupt masked, so implementations need no locking of their own.
pub trait UsartRegisters {
    /// Program baud rate, framing and bit order
    ///
    /// Called with all interrupt sources disabled.
    fn apply_config(&mut self, config: &UartConfig);

    /// Snapshot of the status register
    fn status(&self) -> UsartStatus;

    /// Read the receive data register
    ///
    /// Reading clears the receive-not-empty flag.
    fn read_data(&mut self) -> u8;

    /// Load the transmit data register
    ///
    /// Writing clears the transmit-empty flag until the unit moves to the
    /// shift register.
    fn write_data(&mut self, byte: u8);

    /// Clear framing, parity, noise and overrun flags
    fn clear_errors(&mut self);

    /// Enable or disable one interrupt source
    fn set_interrupt(&mut self, source: UsartInterrupt, enabled: bool);

    /// Enable or disable the receiver (RE bit)
    fn set_receiver(&mut self, enabled: bool);

    /// Enable or disable the transmitter (TE bit)
    fn set_transmitter(&mut self, enabled: bool);
}

/// Decoded USART status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsartStatus {
    /// A received unit is waiting in the data register (RXNE)
    pub rx_not_empty: bool,
    /// The transmit data register can accept a unit (TXE)
    pub tx_empty: bool,
    /// Stop bit not detected (FE)
    pub framing_error: bool,
    /// Parity check failed (PE)
    pub parity_error: bool,
    /// Noise detected on the line (NE)
    pub noise: bool,
    /// A unit arrived before the previous one was read (ORE)
    pub overrun: bool,
}

impl UsartStatus {
    /// Check if any receive error flag is raised
    pub fn has_error(&self) -> bool {
        self.framing_error || self.parity_error || self.noise || self.overrun
    }
}

/// USART interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsartInterrupt {
    /// Receive data register not empty (RXNEIE)
    RxNotEmpty,
    /// Transmit data register empty (TXEIE)
    TxEmpty,
    /// Framing/noise/overrun (EIE) and parity (PEIE)
    Error,
}

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of bits per frame, parity included
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Bit order on the wire
    pub bit_order: BitOrder,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            bit_order: BitOrder::LsbFirst,
        }
    }
}

impl UartConfig {
    /// Create an 8N1 configuration at the given baud rate
    pub const fn baud(baudrate: u32) -> Self {
        Self {
            baudrate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            bit_order: BitOrder::LsbFirst,
        }
    }

    /// Check that the configuration describes byte-sized data units
    ///
    /// The engine moves one byte per interrupt, so a nine-bit frame is
    /// only accepted when the ninth bit is the parity bit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baudrate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.data_bits == DataBits::Nine && self.parity == Parity::None {
            return Err(ConfigError::UnsupportedWidth);
        }
        Ok(())
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataBits {
    Seven,
    Eight,
    Nine,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StopBits {
    One,
    Two,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_8n1() {
        let config = UartConfig::default();
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_nine_bits_requires_parity() {
        let mut config = UartConfig::baud(9600);
        config.data_bits = DataBits::Nine;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedWidth));

        config.parity = Parity::Even;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_baud_rejected() {
        assert_eq!(UartConfig::baud(0).validate(), Err(ConfigError::ZeroRate));
    }
}
