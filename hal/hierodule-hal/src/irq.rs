//! Interrupt line control and idle waiting

/// One peripheral's interrupt line at the interrupt controller
///
/// Masking is the only synchronization the engine uses: application code
/// masks the owning peripheral's line while it touches shared driver
/// state, leaving every other interrupt free to run.
pub trait InterruptLine {
    /// Stop the line from being serviced
    fn mask(&self);

    /// Let the line be serviced again
    fn unmask(&self);

    /// Check if the line is currently masked
    fn is_masked(&self) -> bool;
}

/// Low-power wait primitive used by blocking calls
pub trait Idle {
    /// Sleep until any interrupt has been serviced
    fn wait_for_interrupt(&mut self);
}

/// Cortex-M `WFI` idle
#[cfg(feature = "cortex-m")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Wfi;

#[cfg(feature = "cortex-m")]
impl Idle for Wfi {
    fn wait_for_interrupt(&mut self) {
        cortex_m::asm::wfi();
    }
}
