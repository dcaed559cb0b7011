//! Per-endpoint protocol state

use hierodule_hal::usb::Toggle;

/// Largest full-speed control or bulk packet
pub const MAX_PACKET_SIZE: usize = 64;

/// Control transfer stage
///
/// Bulk endpoints only use `Idle` and their data stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    #[default]
    Idle,
    /// SETUP received, request being resolved
    Setup,
    DataIn,
    DataOut,
    Status,
}

/// Stage, data toggle, packet size and halt state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointState {
    stage: Stage,
    toggle: Toggle,
    max_packet: u16,
    stalled: bool,
}

impl EndpointState {
    pub const fn new(max_packet: u16) -> Self {
        Self {
            stage: Stage::Idle,
            toggle: Toggle::Data0,
            max_packet,
            stalled: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Toggle of the next data packet
    pub fn toggle(&self) -> Toggle {
        self.toggle
    }

    pub fn set_toggle(&mut self, toggle: Toggle) {
        self.toggle = toggle;
    }

    /// Whether a received packet carries the expected toggle
    pub fn matches(&self, toggle: Toggle) -> bool {
        self.toggle == toggle
    }

    /// A packet was acknowledged; the toggle alternates
    pub fn advance(&mut self) {
        self.toggle = self.toggle.flipped();
    }

    pub fn max_packet(&self) -> u16 {
        self.max_packet
    }

    pub fn max_packet_len(&self) -> usize {
        usize::from(self.max_packet)
    }

    pub fn set_max_packet(&mut self, max_packet: u16) {
        self.max_packet = max_packet;
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Halt the endpoint and drop out of any stage
    pub fn stall(&mut self) {
        self.stalled = true;
        self.stage = Stage::Idle;
    }

    /// Clear a halt; the data toggle restarts at DATA0
    pub fn clear_stall(&mut self) {
        self.stalled = false;
        self.toggle = Toggle::Data0;
    }

    /// Back to the post-reset state
    pub fn reset(&mut self) {
        *self = Self::new(self.max_packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_alternates_per_ack() {
        let mut ep = EndpointState::new(64);
        assert!(ep.matches(Toggle::Data0));
        ep.advance();
        assert!(ep.matches(Toggle::Data1));
        ep.advance();
        assert!(ep.matches(Toggle::Data0));
    }

    #[test]
    fn test_clear_stall_resets_toggle() {
        let mut ep = EndpointState::new(64);
        ep.set_stage(Stage::DataOut);
        ep.advance();
        ep.stall();
        assert!(ep.is_stalled());
        assert_eq!(ep.stage(), Stage::Idle);

        ep.clear_stall();
        assert!(!ep.is_stalled());
        assert_eq!(ep.toggle(), Toggle::Data0);
    }
}
