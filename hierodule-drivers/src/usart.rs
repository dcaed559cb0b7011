//! USART framing strategy
//!
//! Receive-not-empty and transmit-empty interrupts move one unit each.
//! While *listening*, the receiver interrupt stays enabled with no read
//! armed, so bytes land in the driver's receive ring as they arrive.

use hierodule_core::{BusEvent, BusProtocol, Direction, Driver, Fault, Phase, Result};
use hierodule_hal::uart::{UartConfig, UsartInterrupt, UsartRegisters, UsartStatus};

/// Interrupt-driven USART driver with an `N`-byte descriptor and ring
pub type UsartDriver<R, const N: usize> = Driver<Usart<R>, N>;

/// USART strategy over a register block
pub struct Usart<R> {
    regs: R,
    listening: bool,
    reading: bool,
    tx_enabled: bool,
}

impl<R: UsartRegisters> Usart<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            listening: false,
            reading: false,
            tx_enabled: false,
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    fn set_rx_interrupts(&mut self, enabled: bool) {
        self.regs.set_interrupt(UsartInterrupt::RxNotEmpty, enabled);
        self.regs.set_interrupt(UsartInterrupt::Error, enabled);
    }

    fn set_tx_interrupt(&mut self, enabled: bool) {
        self.tx_enabled = enabled;
        self.regs.set_interrupt(UsartInterrupt::TxEmpty, enabled);
    }

    /// Receiver interrupts stay on while reading or listening
    fn settle_rx(&mut self) {
        let keep = self.reading || self.listening;
        self.set_rx_interrupts(keep);
    }
}

fn fault_of(status: &UsartStatus) -> Fault {
    // Overrun first: the data register still holds a valid unit
    if status.overrun {
        Fault::Overrun
    } else if status.framing_error {
        Fault::Framing
    } else if status.parity_error {
        Fault::Parity
    } else {
        Fault::Noise
    }
}

impl<R: UsartRegisters> BusProtocol for Usart<R> {
    type Config = UartConfig;

    fn configure(&mut self, config: &UartConfig) -> Result<()> {
        config.validate()?;

        self.set_rx_interrupts(false);
        self.set_tx_interrupt(false);
        self.regs.set_receiver(false);
        self.regs.set_transmitter(false);

        self.regs.apply_config(config);
        self.regs.clear_errors();
        self.regs.set_receiver(true);
        self.regs.set_transmitter(true);

        self.reading = false;
        self.settle_rx();
        debug!("usart configured at {} baud", config.baudrate);
        Ok(())
    }

    fn arm(&mut self, direction: Direction, _len: usize) -> Phase {
        match direction {
            Direction::Read => {
                self.reading = true;
                self.set_rx_interrupts(true);
            }
            Direction::Write => self.set_tx_interrupt(true),
        }
        Phase::Data
    }

    fn poll(&mut self) -> Option<BusEvent> {
        let status = self.regs.status();

        if status.has_error() {
            let fault = fault_of(&status);
            self.regs.clear_errors();
            return Some(BusEvent::Fault(fault));
        }
        if status.rx_not_empty {
            return Some(BusEvent::RxReady(self.regs.read_data()));
        }
        if status.tx_empty && self.tx_enabled {
            return Some(BusEvent::TxReady);
        }
        None
    }

    fn write_unit(&mut self, byte: u8) {
        self.regs.write_data(byte);
    }

    fn tx_idle(&mut self, _read_active: bool) {
        self.set_tx_interrupt(false);
    }

    fn finish(&mut self, direction: Direction) {
        match direction {
            Direction::Read => {
                self.reading = false;
                self.settle_rx();
            }
            // Last unit is loaded; it shifts out without further interrupts
            Direction::Write => self.set_tx_interrupt(false),
        }
    }

    fn abort(&mut self, direction: Direction) {
        self.finish(direction);
    }

    fn listen(&mut self, enabled: bool) {
        self.listening = enabled;
        self.settle_rx();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use hierodule_core::{Error, Handle, TransferState, TransferStatus};
    use hierodule_hal::uart::{DataBits, Parity};
    use hierodule_hal::ConfigError;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// USART register block with a scriptable line
    #[derive(Default)]
    pub(crate) struct MockUsart {
        pub status: UsartStatus,
        pub incoming: VecDeque<u8>,
        pub sent: Vec<u8>,
        pub rx_irq: bool,
        pub tx_irq: bool,
        pub err_irq: bool,
        pub receiver: bool,
        pub transmitter: bool,
        pub applied: Option<UartConfig>,
        /// Keep TXE raised after every write (instant shifter)
        pub auto_tx_empty: bool,
    }

    impl MockUsart {
        pub fn receive(&mut self, bytes: &[u8]) {
            self.incoming.extend(bytes.iter().copied());
            self.status.rx_not_empty = true;
        }
    }

    impl UsartRegisters for MockUsart {
        fn apply_config(&mut self, config: &UartConfig) {
            self.applied = Some(*config);
        }

        fn status(&self) -> UsartStatus {
            self.status
        }

        fn read_data(&mut self) -> u8 {
            let byte = self.incoming.pop_front().unwrap_or(0);
            self.status.rx_not_empty = !self.incoming.is_empty();
            byte
        }

        fn write_data(&mut self, byte: u8) {
            self.sent.push(byte);
            self.status.tx_empty = self.auto_tx_empty;
        }

        fn clear_errors(&mut self) {
            self.status.framing_error = false;
            self.status.parity_error = false;
            self.status.noise = false;
            self.status.overrun = false;
        }

        fn set_interrupt(&mut self, source: UsartInterrupt, enabled: bool) {
            match source {
                UsartInterrupt::RxNotEmpty => self.rx_irq = enabled,
                UsartInterrupt::TxEmpty => self.tx_irq = enabled,
                UsartInterrupt::Error => self.err_irq = enabled,
            }
        }

        fn set_receiver(&mut self, enabled: bool) {
            self.receiver = enabled;
        }

        fn set_transmitter(&mut self, enabled: bool) {
            self.transmitter = enabled;
        }
    }

    pub(crate) fn usart(regs: MockUsart) -> UsartDriver<MockUsart, 16> {
        let mut driver = Driver::new(Usart::new(regs));
        driver.configure(&UartConfig::default()).unwrap();
        driver
    }

    fn regs(driver: &mut UsartDriver<MockUsart, 16>) -> &mut MockUsart {
        driver.protocol_mut().registers_mut()
    }

    #[test]
    fn test_configure_enables_units() {
        let mut driver = usart(MockUsart::default());
        let regs = regs(&mut driver);
        assert!(regs.receiver && regs.transmitter);
        assert_eq!(regs.applied, Some(UartConfig::default()));
        assert!(!regs.rx_irq && !regs.tx_irq);
    }

    #[test]
    fn test_nine_bits_needs_parity() {
        let mut driver: UsartDriver<MockUsart, 16> = Driver::new(Usart::new(MockUsart::default()));
        let config = UartConfig {
            data_bits: DataBits::Nine,
            parity: Parity::None,
            ..Default::default()
        };
        assert_eq!(
            driver.configure(&config),
            Err(Error::InvalidConfig(ConfigError::UnsupportedWidth))
        );
    }

    #[test]
    fn test_write_three_bytes_callback_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static COUNT: AtomicUsize = AtomicUsize::new(0);

        fn on_done(_handle: Handle, status: TransferStatus) {
            assert_eq!(status.state, TransferState::Complete);
            CALLS.fetch_add(1, Ordering::SeqCst);
            COUNT.store(status.transferred, Ordering::SeqCst);
        }

        let mut driver = usart(MockUsart::default());
        driver
            .write_async(&[0x41, 0x42, 0x43], None, Some(on_done))
            .unwrap();
        assert!(regs(&mut driver).tx_irq);

        for _ in 0..3 {
            regs(&mut driver).status.tx_empty = true;
            driver.on_interrupt();
        }

        assert_eq!(regs(&mut driver).sent, [0x41, 0x42, 0x43]);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(COUNT.load(Ordering::SeqCst), 3);
        assert!(!regs(&mut driver).tx_irq);
    }

    #[test]
    fn test_read_with_framing_error() {
        let mut driver = usart(MockUsart::default());
        let handle = driver.read_async(4, None, None).unwrap();

        regs(&mut driver).receive(&[0x01]);
        driver.on_interrupt();
        regs(&mut driver).status.framing_error = true;
        driver.on_interrupt();

        let mut out = [0u8; 4];
        assert_eq!(
            driver.take(handle, &mut out),
            Err(Error::HardwareFault {
                fault: Fault::Framing,
                transferred: 1
            })
        );
        assert!(!regs(&mut driver).rx_irq);
    }

    #[test]
    fn test_cancel_mid_read_disables_interrupt() {
        let mut driver = usart(MockUsart::default());
        let handle = driver.read_async(5, None, None).unwrap();
        assert!(regs(&mut driver).rx_irq);

        regs(&mut driver).receive(&[0xA0, 0xA1]);
        driver.on_interrupt();

        driver.cancel(handle).unwrap();
        let status = driver.status(handle).unwrap();
        assert_eq!(status.state, TransferState::Cancelled);
        assert_eq!(status.transferred, 2);
        assert!(!regs(&mut driver).rx_irq);
        assert!(!regs(&mut driver).err_irq);
    }

    #[test]
    fn test_listening_fills_ring() {
        let mut driver = usart(MockUsart::default());
        driver.listen(true);
        assert!(regs(&mut driver).rx_irq);

        regs(&mut driver).receive(b"hi");
        driver.on_interrupt();
        assert_eq!(driver.next_byte(), Some(b'h'));
        assert_eq!(driver.next_byte(), Some(b'i'));

        // A finished read leaves the receiver armed for listening
        driver.read_async(1, None, None).unwrap();
        regs(&mut driver).receive(b"x");
        driver.on_interrupt();
        assert!(regs(&mut driver).rx_irq);
    }

    #[test]
    fn test_noise_while_listening_counted() {
        let mut driver = usart(MockUsart::default());
        driver.listen(true);
        regs(&mut driver).status.noise = true;
        driver.on_interrupt();

        assert_eq!(driver.dropped(), 1);
        assert!(!regs(&mut driver).status.noise);
    }

    #[test]
    fn test_overrun_reported_first() {
        let status = UsartStatus {
            overrun: true,
            framing_error: true,
            ..Default::default()
        };
        assert_eq!(fault_of(&status), Fault::Overrun);
    }
}
