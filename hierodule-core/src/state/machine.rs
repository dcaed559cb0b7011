//! Transfer state machine
//!
//! The state of one transfer descriptor is a pure function of its
//! previous state and an event. Drivers feed events from both the
//! application side and interrupt entry.

use super::events::TransferEvent;
use crate::error::Fault;

/// Sub-phase of an in-progress transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Addressing the target (addressed buses only)
    Address,
    /// Moving data units
    Data,
}

/// Transfer states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    /// No transfer
    #[default]
    Idle,
    /// Hardware armed, waiting for the first interrupt
    Armed,
    /// Interrupts are moving the transfer forward
    InProgress(Phase),
    /// All requested units moved
    Complete,
    /// Hardware fault; partial count preserved
    Error(Fault),
    /// Timeout elapsed; partial count preserved
    TimedOut,
    /// Cancelled by the application
    Cancelled,
}

impl TransferState {
    /// Armed or in progress
    pub fn is_active(&self) -> bool {
        matches!(self, TransferState::Armed | TransferState::InProgress(_))
    }

    /// Reached an outcome
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Complete
                | TransferState::Error(_)
                | TransferState::TimedOut
                | TransferState::Cancelled
        )
    }

    /// Process an event and return the next state
    pub fn transition(self, event: TransferEvent) -> Self {
        use Phase::*;
        use TransferEvent::*;
        use TransferState::*;

        match (self, event) {
            // A new transfer may reuse a finished descriptor
            (Idle, Start) => Armed,
            (s, Start) if s.is_terminal() => Armed,

            // Addressing sub-phase
            (Armed, StartSent) => InProgress(Address),
            (InProgress(Address), AddressAcked) => InProgress(Data),

            // Data phase
            (Armed, Unit) | (InProgress(Data), Unit) => InProgress(Data),
            (Armed, LastUnit) | (InProgress(Data), LastUnit) => Complete,

            // Abnormal endings
            (s, TransferEvent::Fault(fault)) if s.is_active() => Error(fault),
            (s, Expired) if s.is_active() => TimedOut,
            (s, Cancel) if s.is_active() => Cancelled,

            (_, Reset) => Idle,

            // Default: stay in current state
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_path() {
        let state = TransferState::Idle.transition(TransferEvent::Start);
        assert_eq!(state, TransferState::Armed);

        let state = state.transition(TransferEvent::Unit);
        assert_eq!(state, TransferState::InProgress(Phase::Data));

        let state = state.transition(TransferEvent::LastUnit);
        assert_eq!(state, TransferState::Complete);
    }

    #[test]
    fn test_address_phase() {
        let state = TransferState::Armed
            .transition(TransferEvent::StartSent)
            .transition(TransferEvent::AddressAcked);
        assert_eq!(state, TransferState::InProgress(Phase::Data));
    }

    #[test]
    fn test_address_nack_skips_data_phase() {
        let state = TransferState::Armed
            .transition(TransferEvent::StartSent)
            .transition(TransferEvent::Fault(Fault::AddressNack));
        assert_eq!(state, TransferState::Error(Fault::AddressNack));
    }

    #[test]
    fn test_data_before_address_ignored() {
        let state = TransferState::InProgress(Phase::Address).transition(TransferEvent::Unit);
        assert_eq!(state, TransferState::InProgress(Phase::Address));
    }

    #[test]
    fn test_abnormal_endings_from_active() {
        for state in [TransferState::Armed, TransferState::InProgress(Phase::Data)] {
            assert_eq!(state.transition(TransferEvent::Expired), TransferState::TimedOut);
            assert_eq!(state.transition(TransferEvent::Cancel), TransferState::Cancelled);
            assert_eq!(
                state.transition(TransferEvent::Fault(Fault::Overrun)),
                TransferState::Error(Fault::Overrun)
            );
        }
    }

    #[test]
    fn test_terminal_states_hold() {
        let terminal = [
            TransferState::Complete,
            TransferState::Error(Fault::Nack),
            TransferState::TimedOut,
            TransferState::Cancelled,
        ];

        for state in terminal {
            assert_eq!(state.transition(TransferEvent::Cancel), state);
            assert_eq!(state.transition(TransferEvent::Expired), state);
            assert_eq!(state.transition(TransferEvent::Unit), state);
            assert_eq!(state.transition(TransferEvent::Reset), TransferState::Idle);
        }
    }

    #[test]
    fn test_idle_ignores_interrupt_events() {
        let state = TransferState::Idle;
        assert_eq!(state.transition(TransferEvent::Unit), TransferState::Idle);
        assert_eq!(state.transition(TransferEvent::Expired), TransferState::Idle);
    }
}
