//! I2C register abstractions
//!
//! Provides the register-level operations for an interrupt-driven I2C
//! unit acting as bus master, and as a slave when an own address is set.

use crate::ConfigError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// I2C register access
pub trait I2cRegisters {
    /// Program timing, own address and clock stretching
    fn apply_config(&mut self, config: &I2cConfig);

    /// Snapshot of the status registers
    fn status(&self) -> I2cStatus;

    /// Read the data register (clears RXNE)
    fn read_data(&mut self) -> u8;

    /// Load the data register (clears TXE)
    fn write_data(&mut self, byte: u8);

    /// Request a START (or repeated START) condition
    fn generate_start(&mut self);

    /// Request a STOP condition after the current unit
    fn generate_stop(&mut self);

    /// Select whether the next received unit is ACKed or NACKed
    fn set_ack(&mut self, ack: bool);

    /// Enable or disable one interrupt source
    fn set_interrupt(&mut self, source: I2cInterrupt, enabled: bool);

    /// Enable or disable clock stretching (NOSTRETCH cleared/set)
    fn set_clock_stretching(&mut self, enabled: bool);

    /// Clear one event or error flag
    fn clear(&mut self, flag: I2cFlag);
}

/// Decoded I2C status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cStatus {
    /// Unit currently owns the bus as master (MSL)
    pub master: bool,
    /// START condition generated (SB)
    pub start_sent: bool,
    /// Address sent and ACKed (master) or own address matched (slave)
    pub address_matched: bool,
    /// Slave addressed for a master read (TRA/DIR)
    pub slave_transmitter: bool,
    /// Data register empty (TXE/TXIS)
    pub tx_empty: bool,
    /// Data register not empty (RXNE)
    pub rx_not_empty: bool,
    /// Acknowledge failure (AF/NACKF)
    pub nack: bool,
    /// Arbitration lost (ARLO)
    pub arbitration_lost: bool,
    /// Misplaced START or STOP (BERR)
    pub bus_error: bool,
    /// STOP detected in slave mode (STOPF)
    pub stop_detected: bool,
}

/// I2C interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cInterrupt {
    /// START, address, STOP events (ITEVTEN)
    Event,
    /// TXE and RXNE (ITBUFEN)
    Buffer,
    /// NACK, arbitration loss, bus error (ITERREN)
    Error,
}

/// Clearable I2C flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cFlag {
    Address,
    Nack,
    ArbitrationLost,
    BusError,
    Stop,
}

/// I2C configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct I2cConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
    /// 7-bit own address; `None` disables slave mode
    pub own_address: Option<u8>,
    /// Allow slaves (and this unit as slave) to hold SCL low
    pub clock_stretching: bool,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl I2cConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: Self = Self::with_frequency(100_000);

    /// Fast mode (400 kHz)
    pub const FAST: Self = Self::with_frequency(400_000);

    /// Fast mode plus (1 MHz)
    pub const FAST_PLUS: Self = Self::with_frequency(1_000_000);

    /// Master-only configuration at the given frequency
    pub const fn with_frequency(frequency: u32) -> Self {
        Self {
            frequency,
            own_address: None,
            clock_stretching: true,
        }
    }

    /// Respond to `address` as a slave
    pub const fn with_own_address(mut self, address: u8) -> Self {
        self.own_address = Some(address);
        self
    }

    /// Check frequency and own address
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frequency == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if let Some(address) = self.own_address {
            if address > 0x7F {
                return Err(ConfigError::InvalidAddress);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(I2cConfig::default().frequency, 100_000);
        assert_eq!(I2cConfig::FAST.frequency, 400_000);
        assert_eq!(I2cConfig::FAST_PLUS.own_address, None);
    }

    #[test]
    fn test_own_address_range() {
        let config = I2cConfig::FAST.with_own_address(0x42);
        assert_eq!(config.validate(), Ok(()));

        let config = I2cConfig::FAST.with_own_address(0x80);
        assert_eq!(config.validate(), Err(ConfigError::InvalidAddress));
    }
}
