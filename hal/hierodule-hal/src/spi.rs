//! SPI register abstractions
//!
//! Provides the register-level operations for an interrupt-driven SPI
//! unit in either master or slave role.

use crate::{BitOrder, ConfigError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// SPI register access
pub trait SpiRegisters {
    /// Program role, clock divider, mode and bit order
    ///
    /// Called with the peripheral disabled and all interrupt sources off.
    fn apply_config(&mut self, config: &SpiConfig);

    /// Snapshot of the status register
    fn status(&self) -> SpiStatus;

    /// Read the data register (clears RXNE)
    fn read_data(&mut self) -> u8;

    /// Load the data register (clears TXE)
    fn write_data(&mut self, byte: u8);

    /// Enable or disable one interrupt source
    fn set_interrupt(&mut self, source: SpiInterrupt, enabled: bool);

    /// Set or clear the peripheral enable bit (SPE)
    fn set_enabled(&mut self, enabled: bool);

    /// Clear the mode fault flag
    ///
    /// Hardware clears MODF on a status read followed by a CR1 write;
    /// implementations perform that sequence here.
    fn clear_mode_fault(&mut self);

    /// Clear the overrun flag
    fn clear_overrun(&mut self);
}

/// Decoded SPI status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiStatus {
    /// Received unit waiting (RXNE)
    pub rx_not_empty: bool,
    /// Transmit buffer empty (TXE)
    pub tx_empty: bool,
    /// Bus busy shifting (BSY)
    pub busy: bool,
    /// NSS pulled low while in master role (MODF)
    pub mode_fault: bool,
    /// Unit received before the previous one was read (OVR)
    pub overrun: bool,
}

/// SPI interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiInterrupt {
    /// Receive buffer not empty (RXNEIE)
    RxNotEmpty,
    /// Transmit buffer empty (TXEIE)
    TxEmpty,
    /// Mode fault and overrun (ERRIE)
    Error,
}

/// SPI configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpiConfig {
    /// Master generates the clock; slave follows an external master
    pub role: Role,
    /// Peripheral clock divider (power of two, 2..=256)
    pub clock_divider: u16,
    /// Clock polarity
    pub polarity: Polarity,
    /// Clock phase
    pub phase: Phase,
    /// Bit order on the wire
    pub bit_order: BitOrder,
    /// Unit shifted out while reading with nothing to write
    pub fill_byte: u8,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            clock_divider: 8,
            polarity: Polarity::IdleLow,
            phase: Phase::CaptureOnFirstTransition,
            bit_order: BitOrder::MsbFirst,
            fill_byte: 0x00,
        }
    }
}

impl SpiConfig {
    /// Set polarity and phase from a combined SPI mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        let (polarity, phase) = mode.into();
        self.polarity = polarity;
        self.phase = phase;
        self
    }

    /// Check the clock divider is a supported power of two
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=256).contains(&self.clock_divider) || !self.clock_divider.is_power_of_two() {
            return Err(ConfigError::InvalidDivider);
        }
        Ok(())
    }
}

/// SPI role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    /// This unit drives SCK and NSS
    #[default]
    Master,
    /// An external master drives SCK
    Slave,
}

/// SPI clock polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Polarity {
    /// Clock idles low (CPOL=0)
    IdleLow,
    /// Clock idles high (CPOL=1)
    IdleHigh,
}

/// SPI clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    /// Data captured on first clock transition (CPHA=0)
    CaptureOnFirstTransition,
    /// Data captured on second clock transition (CPHA=1)
    CaptureOnSecondTransition,
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl From<Mode> for (Polarity, Phase) {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => (Polarity::IdleLow, Phase::CaptureOnFirstTransition),
            Mode::Mode1 => (Polarity::IdleLow, Phase::CaptureOnSecondTransition),
            Mode::Mode2 => (Polarity::IdleHigh, Phase::CaptureOnFirstTransition),
            Mode::Mode3 => (Polarity::IdleHigh, Phase::CaptureOnSecondTransition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_conversion() {
        let config = SpiConfig::default().with_mode(Mode::Mode3);
        assert_eq!(config.polarity, Polarity::IdleHigh);
        assert_eq!(config.phase, Phase::CaptureOnSecondTransition);
    }

    #[test]
    fn test_divider_validation() {
        let mut config = SpiConfig::default();
        assert_eq!(config.validate(), Ok(()));

        config.clock_divider = 6;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDivider));

        config.clock_divider = 512;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDivider));

        config.clock_divider = 1;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDivider));
    }
}
