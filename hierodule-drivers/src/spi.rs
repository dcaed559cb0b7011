//! SPI framing strategy
//!
//! SPI is full duplex: every unit clocked out clocks one in. In master
//! role a read with nothing to write clocks out the configured fill byte,
//! and units received during a write-only transfer go to the receive
//! ring. In slave role the external master drives the clock; armed write
//! data is shifted out as it clocks and unsolicited units are queued.

use hierodule_core::{BusEvent, BusProtocol, Direction, Driver, Fault, Phase, Result};
use hierodule_hal::spi::{Role, SpiConfig, SpiInterrupt, SpiRegisters};

/// Interrupt-driven SPI driver with an `N`-byte descriptor and ring
pub type SpiDriver<R, const N: usize> = Driver<Spi<R>, N>;

/// SPI strategy over a register block
pub struct Spi<R> {
    regs: R,
    role: Role,
    fill_byte: u8,
    reading: bool,
    /// Units the master still has to clock for the armed read
    clocks_left: usize,
    tx_enabled: bool,
}

impl<R: SpiRegisters> Spi<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            role: Role::Master,
            fill_byte: 0,
            reading: false,
            clocks_left: 0,
            tx_enabled: false,
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn set_tx_interrupt(&mut self, enabled: bool) {
        self.tx_enabled = enabled;
        self.regs.set_interrupt(SpiInterrupt::TxEmpty, enabled);
    }

    fn needs_clocks(&self) -> bool {
        self.role == Role::Master && self.reading && self.clocks_left > 0
    }

    /// Keep TXE on only while the master still has units to clock
    fn settle_tx(&mut self) {
        let keep = self.needs_clocks();
        self.set_tx_interrupt(keep);
    }
}

impl<R: SpiRegisters> BusProtocol for Spi<R> {
    type Config = SpiConfig;

    fn configure(&mut self, config: &SpiConfig) -> Result<()> {
        config.validate()?;

        self.regs.set_enabled(false);
        self.regs.set_interrupt(SpiInterrupt::RxNotEmpty, false);
        self.regs.set_interrupt(SpiInterrupt::Error, false);
        self.set_tx_interrupt(false);

        self.regs.apply_config(config);
        self.regs.clear_overrun();
        self.regs.clear_mode_fault();
        self.regs.set_enabled(true);

        self.role = config.role;
        self.fill_byte = config.fill_byte;
        self.reading = false;
        self.clocks_left = 0;

        // Receiver stays live so full-duplex and slave units are never lost
        self.regs.set_interrupt(SpiInterrupt::RxNotEmpty, true);
        self.regs.set_interrupt(SpiInterrupt::Error, true);
        debug!("spi configured as {}", config.role);
        Ok(())
    }

    fn arm(&mut self, direction: Direction, len: usize) -> Phase {
        match direction {
            Direction::Read => {
                self.reading = true;
                self.clocks_left = len;
                if self.role == Role::Master {
                    self.set_tx_interrupt(true);
                }
            }
            Direction::Write => self.set_tx_interrupt(true),
        }
        Phase::Data
    }

    fn poll(&mut self) -> Option<BusEvent> {
        let status = self.regs.status();

        if status.mode_fault {
            self.regs.clear_mode_fault();
            return Some(BusEvent::Fault(Fault::ModeFault));
        }
        if status.overrun {
            self.regs.clear_overrun();
            return Some(BusEvent::Fault(Fault::Overrun));
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
        self.clocks_left = self.clocks_left.saturating_sub(1);
        self.regs.write_data(byte);
    }

    fn tx_idle(&mut self, read_active: bool) {
        if read_active && self.needs_clocks() {
            self.clocks_left -= 1;
            self.regs.write_data(self.fill_byte);
            return;
        }
        if self.role == Role::Slave {
            // What the external master reads when nothing is armed
            self.regs.write_data(self.fill_byte);
        }
        self.set_tx_interrupt(false);
    }

    fn finish(&mut self, direction: Direction) {
        if direction == Direction::Read {
            self.reading = false;
            self.clocks_left = 0;
        }
        self.settle_tx();
    }

    fn abort(&mut self, direction: Direction) {
        self.finish(direction);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hierodule_core::{Error, TransferState};
    use hierodule_hal::spi::SpiStatus;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// SPI register block whose shifter completes instantly
    ///
    /// Every written unit is answered with the next `miso` unit (or
    /// 0xFF) in the receive register.
    #[derive(Default)]
    pub(crate) struct MockSpi {
        pub status: SpiStatus,
        pub miso: VecDeque<u8>,
        pub mosi: Vec<u8>,
        rx: Option<u8>,
        pub rx_irq: bool,
        pub tx_irq: bool,
        pub enabled: bool,
        pub applied: Option<SpiConfig>,
    }

    impl SpiRegisters for MockSpi {
        fn apply_config(&mut self, config: &SpiConfig) {
            self.applied = Some(*config);
        }

        fn status(&self) -> SpiStatus {
            SpiStatus {
                rx_not_empty: self.rx.is_some(),
                tx_empty: true,
                ..self.status
            }
        }

        fn read_data(&mut self) -> u8 {
            self.rx.take().unwrap_or(0)
        }

        fn write_data(&mut self, byte: u8) {
            self.mosi.push(byte);
            if self.rx.is_some() {
                self.status.overrun = true;
            }
            self.rx = Some(self.miso.pop_front().unwrap_or(0xFF));
        }

        fn set_interrupt(&mut self, source: SpiInterrupt, enabled: bool) {
            match source {
                SpiInterrupt::RxNotEmpty => self.rx_irq = enabled,
                SpiInterrupt::TxEmpty => self.tx_irq = enabled,
                SpiInterrupt::Error => {}
            }
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }

        fn clear_mode_fault(&mut self) {
            self.status.mode_fault = false;
        }

        fn clear_overrun(&mut self) {
            self.status.overrun = false;
        }
    }

    pub(crate) fn spi(config: SpiConfig) -> SpiDriver<MockSpi, 16> {
        let mut driver = Driver::new(Spi::new(MockSpi::default()));
        driver.configure(&config).unwrap();
        driver
    }

    fn regs(driver: &mut SpiDriver<MockSpi, 16>) -> &mut MockSpi {
        driver.protocol_mut().registers_mut()
    }

    #[test]
    fn test_master_read_clocks_fill_bytes() {
        let config = SpiConfig {
            fill_byte: 0xA5,
            ..Default::default()
        };
        let mut driver = spi(config);
        regs(&mut driver).miso.extend([0x10, 0x20, 0x30]);

        let handle = driver.read_async(3, None, None).unwrap();
        driver.on_interrupt();

        let mut out = [0u8; 3];
        assert_eq!(driver.take(handle, &mut out), Ok(3));
        assert_eq!(out, [0x10, 0x20, 0x30]);
        assert_eq!(regs(&mut driver).mosi, [0xA5, 0xA5, 0xA5]);
        assert!(!regs(&mut driver).tx_irq);
    }

    #[test]
    fn test_write_only_queues_received() {
        let mut driver = spi(SpiConfig::default());
        regs(&mut driver).miso.extend([1, 2]);

        let handle = driver.write_async(&[0xDE, 0xAD], None, None).unwrap();
        driver.on_interrupt();

        assert_eq!(driver.status(handle).unwrap().state, TransferState::Complete);
        assert_eq!(regs(&mut driver).mosi, [0xDE, 0xAD]);
        assert_eq!(driver.next_byte(), Some(1));
        assert_eq!(driver.next_byte(), Some(2));
    }

    #[test]
    fn test_full_duplex_read_while_writing() {
        let mut driver = spi(SpiConfig::default());
        regs(&mut driver).miso.extend([7, 8, 9]);

        let read = driver.read_async(3, None, None).unwrap();
        let write = driver.write_async(&[1, 2, 3], None, None).unwrap();
        driver.on_interrupt();

        let mut out = [0u8; 3];
        assert_eq!(driver.take(read, &mut out), Ok(3));
        assert_eq!(out, [7, 8, 9]);
        assert_eq!(driver.take(write, &mut []), Ok(3));
        // No fill bytes were needed
        assert_eq!(regs(&mut driver).mosi, [1, 2, 3]);
    }

    #[test]
    fn test_mode_fault_aborts_all() {
        let mut driver = spi(SpiConfig::default());
        let read = driver.read_async(4, None, None).unwrap();
        let write = driver.write_async(&[1, 2, 3, 4], None, None).unwrap();

        regs(&mut driver).status.mode_fault = true;
        driver.on_interrupt();

        for handle in [read, write] {
            assert_eq!(
                driver.status(handle).unwrap().state,
                TransferState::Error(Fault::ModeFault)
            );
        }
        assert!(!regs(&mut driver).tx_irq);
    }

    #[test]
    fn test_slave_shifts_out_armed_write() {
        let config = SpiConfig {
            role: Role::Slave,
            fill_byte: 0xEE,
            ..Default::default()
        };
        let mut driver = spi(config);

        // A slave read waits for the external clock
        driver.read_async(1, None, None).unwrap();
        assert!(!regs(&mut driver).tx_irq);

        let write = driver.write_async(&[0x42], None, None).unwrap();
        driver.on_interrupt();
        assert_eq!(driver.status(write).unwrap().state, TransferState::Complete);
        assert_eq!(regs(&mut driver).mosi, [0x42]);
    }

    #[test]
    fn test_invalid_divider() {
        let mut driver: SpiDriver<MockSpi, 16> = Driver::new(Spi::new(MockSpi::default()));
        let config = SpiConfig {
            clock_divider: 3,
            ..Default::default()
        };
        assert!(matches!(driver.configure(&config), Err(Error::InvalidConfig(_))));
    }
}
