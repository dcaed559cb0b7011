//! Transfer error types

use hierodule_hal::ConfigError;

/// Result alias used throughout the engine
pub type Result<T> = core::result::Result<T, Error>;

/// Hardware condition that failed a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// Stop bit not found where expected (USART)
    Framing,
    /// Parity check failed (USART)
    Parity,
    /// Noise detected on a sample (USART)
    Noise,
    /// Unit received before the previous one was read
    Overrun,
    /// Data byte not acknowledged (I2C)
    Nack,
    /// Address not acknowledged (I2C)
    AddressNack,
    /// Another master won the bus (I2C)
    ArbitrationLost,
    /// Misplaced START or STOP (I2C)
    BusError,
    /// NSS driven low while in master role (SPI)
    ModeFault,
    /// Packet arrived with an unexpected data PID (USB)
    DataToggle,
}

impl Fault {
    /// Fault raised by the receiver, affecting reads only
    pub fn is_receive_side(&self) -> bool {
        matches!(
            self,
            Fault::Framing | Fault::Parity | Fault::Noise | Fault::Overrun
        )
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Fault::Framing => write!(f, "framing error"),
            Fault::Parity => write!(f, "parity error"),
            Fault::Noise => write!(f, "noise detected"),
            Fault::Overrun => write!(f, "overrun"),
            Fault::Nack => write!(f, "data NACK"),
            Fault::AddressNack => write!(f, "address NACK"),
            Fault::ArbitrationLost => write!(f, "arbitration lost"),
            Fault::BusError => write!(f, "bus error"),
            Fault::ModeFault => write!(f, "mode fault"),
            Fault::DataToggle => write!(f, "data toggle mismatch"),
        }
    }
}

/// Engine error
///
/// Variants that end a started transfer carry the number of units moved
/// before it stopped. A partial count is never reported as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A transfer in this direction is already armed or in progress
    Busy,
    /// The transfer's timeout elapsed first
    Timeout { transferred: usize },
    /// The hardware reported a fault
    HardwareFault { fault: Fault, transferred: usize },
    /// The application cancelled the transfer
    Cancelled { transferred: usize },
    /// Malformed or unsupported USB request
    Protocol,
    /// Handle does not name a live transfer
    NotFound,
    /// Request exceeds the descriptor capacity
    TooLong,
    /// Configuration rejected
    InvalidConfig(ConfigError),
    /// Peripheral (or USB device) not configured yet
    NotConfigured,
    /// Interrupt vector already has a handler
    Occupied,
}

impl Error {
    /// Units moved before the transfer ended, if the error ended one
    pub fn transferred(&self) -> Option<usize> {
        match *self {
            Error::Timeout { transferred }
            | Error::HardwareFault { transferred, .. }
            | Error::Cancelled { transferred } => Some(transferred),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::InvalidConfig(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Busy => write!(f, "Transfer already active"),
            Error::Timeout { transferred } => {
                write!(f, "Timed out after {} units", transferred)
            }
            Error::HardwareFault { fault, transferred } => {
                write!(f, "Hardware fault ({}) after {} units", fault, transferred)
            }
            Error::Cancelled { transferred } => {
                write!(f, "Cancelled after {} units", transferred)
            }
            Error::Protocol => write!(f, "Protocol error"),
            Error::NotFound => write!(f, "No such transfer"),
            Error::TooLong => write!(f, "Request too long"),
            Error::InvalidConfig(err) => write!(f, "Invalid configuration: {}", err),
            Error::NotConfigured => write!(f, "Not configured"),
            Error::Occupied => write!(f, "Vector already registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_side_faults() {
        assert!(Fault::Framing.is_receive_side());
        assert!(Fault::Overrun.is_receive_side());
        assert!(!Fault::ModeFault.is_receive_side());
        assert!(!Fault::AddressNack.is_receive_side());
    }

    #[test]
    fn test_partial_count() {
        let err = Error::HardwareFault {
            fault: Fault::Nack,
            transferred: 3,
        };
        assert_eq!(err.transferred(), Some(3));
        assert_eq!(Error::Busy.transferred(), None);
    }

    #[test]
    fn test_config_error_conversion() {
        let err: Error = ConfigError::ZeroRate.into();
        assert_eq!(err, Error::InvalidConfig(ConfigError::ZeroRate));
    }
}
