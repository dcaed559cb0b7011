//! Events that advance a transfer

use crate::error::Fault;

/// Events that can trigger transfer state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferEvent {
    // Application events
    /// Transfer started and hardware armed
    Start,
    /// Application cancelled the transfer
    Cancel,
    /// Result collected, descriptor released
    Reset,

    // Interrupt events
    /// START condition is on the bus, address about to be sent
    StartSent,
    /// Slave acknowledged its address
    AddressAcked,
    /// One unit moved, more remain
    Unit,
    /// Final unit moved
    LastUnit,
    /// Hardware reported a fault
    Fault(Fault),

    // Timer events
    /// Timeout elapsed without completion
    Expired,
}
