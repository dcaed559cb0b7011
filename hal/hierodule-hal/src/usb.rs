//! USB device register abstractions
//!
//! The packet memory and endpoint registers of a full-speed device
//! controller, reduced to what the control/data engine needs: event
//! flags, packet copy in/out, stall and address control.

use crate::ConfigError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Data PID of a data packet (the data-toggle bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Toggle {
    #[default]
    Data0,
    Data1,
}

impl Toggle {
    /// The other toggle value
    pub fn flipped(self) -> Self {
        match self {
            Toggle::Data0 => Toggle::Data1,
            Toggle::Data1 => Toggle::Data0,
        }
    }
}

/// Endpoint address as used in descriptors and `wIndex`
///
/// Bit 7 is the direction (set for IN), bits 3..0 the endpoint number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    /// Control endpoint, OUT direction
    pub const CONTROL_OUT: Self = Self(0x00);
    /// Control endpoint, IN direction
    pub const CONTROL_IN: Self = Self(0x80);

    /// IN endpoint with the given number
    pub const fn in_ep(number: u8) -> Self {
        Self(0x80 | (number & 0x0F))
    }

    /// OUT endpoint with the given number
    pub const fn out_ep(number: u8) -> Self {
        Self(number & 0x0F)
    }

    /// Endpoint number (0..=15)
    pub const fn number(self) -> u8 {
        self.0 & 0x0F
    }

    /// Device-to-host endpoint
    pub const fn is_in(self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// One decoded USB interrupt condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbEvent {
    /// Bus reset signalled by the host
    Reset,
    /// A SETUP packet landed in the endpoint's buffer
    Setup { endpoint: u8 },
    /// An OUT data packet landed, carrying the observed data PID
    Out { endpoint: u8, toggle: Toggle },
    /// An IN packet was ACKed by the host
    InComplete { endpoint: u8 },
    /// Bus idle for 3 ms
    Suspend,
    /// Resume signalling after suspend
    Resume,
}

/// USB device controller register access
pub trait UsbRegisters {
    /// Enable the pull-up and endpoint 0 with the configured packet sizes
    fn apply_config(&mut self, config: &UsbConfig);

    /// Read and clear the highest-priority pending event
    fn poll(&mut self) -> Option<UsbEvent>;

    /// Copy the 8-byte SETUP packet out of packet memory
    fn read_setup(&mut self, endpoint: u8) -> [u8; 8];

    /// Copy an OUT packet into `buf`, returning its length
    fn read_packet(&mut self, endpoint: u8, buf: &mut [u8]) -> usize;

    /// Queue an IN packet with the given data PID
    fn write_packet(&mut self, endpoint: u8, data: &[u8], toggle: Toggle);

    /// Accept the next OUT packet on the endpoint (clear NAK)
    fn arm_out(&mut self, endpoint: u8);

    /// Set or clear the STALL handshake
    fn set_stall(&mut self, endpoint: EndpointAddress, stalled: bool);

    /// Program the device address
    fn set_address(&mut self, address: u8);

    /// Enable or disable the controller's interrupt sources
    fn set_interrupts(&mut self, enabled: bool);
}

/// USB device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UsbConfig {
    /// Max packet size of endpoint 0 (8, 16, 32 or 64)
    pub control_max_packet: u16,
    /// Max packet size of bulk endpoints (8, 16, 32 or 64)
    pub bulk_max_packet: u16,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            control_max_packet: 64,
            bulk_max_packet: 64,
        }
    }
}

impl UsbConfig {
    /// Check packet sizes against the full-speed limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = |size: u16| matches!(size, 8 | 16 | 32 | 64);
        if !valid(self.control_max_packet) || !valid(self.bulk_max_packet) {
            return Err(ConfigError::InvalidPacketSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_address() {
        let ep = EndpointAddress::in_ep(2);
        assert_eq!(ep.0, 0x82);
        assert!(ep.is_in());
        assert_eq!(ep.number(), 2);

        let ep = EndpointAddress::out_ep(1);
        assert!(!ep.is_in());
        assert_eq!(ep.number(), 1);
    }

    #[test]
    fn test_toggle_flip() {
        assert_eq!(Toggle::Data0.flipped(), Toggle::Data1);
        assert_eq!(Toggle::Data1.flipped(), Toggle::Data0);
    }

    #[test]
    fn test_packet_size_validation() {
        assert_eq!(UsbConfig::default().validate(), Ok(()));

        let config = UsbConfig {
            control_max_packet: 12,
            bulk_max_packet: 64,
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPacketSize));
    }
}
