//! I2C framing strategy
//!
//! Master transfers run START, address, data, STOP. The transfer starts
//! in the address phase; an address NACK ends it there. For reads the
//! unit before the last is followed by NACK and STOP so the target
//! releases the bus after the final unit.
//!
//! With an own address configured the unit also answers as a slave:
//! units written by an external master are queued in the receive ring,
//! and reads by an external master are served from the slave response
//! buffer. Armed transfers always run as master; the slave side never
//! fills a descriptor.

use heapless::Vec;
use hierodule_core::{
    BusEvent, BusProtocol, Callback, Direction, Driver, Error, Fault, Handle, Phase, Result,
};
use hierodule_hal::i2c::{I2cConfig, I2cFlag, I2cInterrupt, I2cRegisters};

/// Interrupt-driven I2C driver with an `N`-byte descriptor and ring
pub type I2cDriver<R, const N: usize> = Driver<I2c<R>, N>;

/// Capacity of the slave response buffer
pub const SLAVE_RESPONSE_CAPACITY: usize = 32;

/// Unit clocked out once the slave response is exhausted
const SLAVE_PAD: u8 = 0x00;

/// I2C strategy over a register block
pub struct I2c<R> {
    regs: R,
    target: u8,
    own_address: Option<u8>,
    /// Master transfer in flight
    active: Option<Direction>,
    awaiting_address: bool,
    /// TXE belongs to a master write (the buffer interrupt is shared)
    tx_enabled: bool,
    slave_response: Vec<u8, SLAVE_RESPONSE_CAPACITY>,
    slave_index: usize,
    slave_transmitting: bool,
}

impl<R: I2cRegisters> I2c<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            target: 0,
            own_address: None,
            active: None,
            awaiting_address: false,
            tx_enabled: false,
            slave_response: Vec::new(),
            slave_index: 0,
            slave_transmitting: false,
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Select the 7-bit target of the next master transfer
    pub fn set_target(&mut self, address: u8) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Busy);
        }
        if address > 0x7F {
            return Err(Error::InvalidConfig(hierodule_hal::ConfigError::InvalidAddress));
        }
        self.target = address;
        Ok(())
    }

    /// Units served to the next external master read
    pub fn set_slave_response(&mut self, bytes: &[u8]) -> Result<()> {
        self.slave_response = Vec::from_slice(bytes).map_err(|_| Error::TooLong)?;
        self.slave_index = 0;
        Ok(())
    }

    fn next_slave_unit(&mut self) -> u8 {
        let byte = self
            .slave_response
            .get(self.slave_index)
            .copied()
            .unwrap_or(SLAVE_PAD);
        self.slave_index += 1;
        byte
    }

    /// Interrupt sources with no master transfer in flight
    fn idle_interrupts(&mut self) {
        let slave = self.own_address.is_some();
        self.tx_enabled = false;
        self.regs.set_interrupt(I2cInterrupt::Event, slave);
        self.regs.set_interrupt(I2cInterrupt::Buffer, slave);
        self.regs.set_interrupt(I2cInterrupt::Error, slave);
    }

    fn end_master(&mut self) {
        self.active = None;
        self.awaiting_address = false;
        self.regs.set_ack(true);
        self.idle_interrupts();
    }

    fn poll_slave(&mut self, status: &hierodule_hal::i2c::I2cStatus) -> Option<BusEvent> {
        if status.address_matched {
            self.regs.clear(I2cFlag::Address);
            self.slave_transmitting = status.slave_transmitter;
            self.slave_index = 0;
            trace!("addressed as slave, transmitting: {}", status.slave_transmitter);
        }
        if status.nack && self.slave_transmitting {
            // External master NACKs the last unit it wants
            self.regs.clear(I2cFlag::Nack);
            self.slave_transmitting = false;
            return Some(BusEvent::SlaveDone(Direction::Write));
        }
        if status.tx_empty && self.slave_transmitting {
            let byte = self.next_slave_unit();
            self.regs.write_data(byte);
        }
        if status.rx_not_empty {
            return Some(BusEvent::RxReady(self.regs.read_data()));
        }
        if status.stop_detected {
            self.regs.clear(I2cFlag::Stop);
            return Some(BusEvent::SlaveDone(Direction::Read));
        }
        None
    }
}

/// Addressed master transfers
pub trait I2cMaster {
    /// Read `len` units from the 7-bit `address`
    fn read_from(
        &mut self,
        address: u8,
        len: usize,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle>;

    /// Write `bytes` to the 7-bit `address`
    fn write_to(
        &mut self,
        address: u8,
        bytes: &[u8],
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle>;
}

impl<R: I2cRegisters, const N: usize> I2cMaster for I2cDriver<R, N> {
    fn read_from(
        &mut self,
        address: u8,
        len: usize,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle> {
        self.protocol_mut().set_target(address)?;
        self.read_async(len, timeout, callback)
    }

    fn write_to(
        &mut self,
        address: u8,
        bytes: &[u8],
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle> {
        self.protocol_mut().set_target(address)?;
        self.write_async(bytes, timeout, callback)
    }
}

impl<R: I2cRegisters> BusProtocol for I2c<R> {
    type Config = I2cConfig;

    const HALF_DUPLEX: bool = true;

    fn configure(&mut self, config: &I2cConfig) -> Result<()> {
        config.validate()?;

        self.regs.set_interrupt(I2cInterrupt::Event, false);
        self.regs.set_interrupt(I2cInterrupt::Buffer, false);
        self.regs.set_interrupt(I2cInterrupt::Error, false);

        self.regs.apply_config(config);
        self.regs.set_clock_stretching(config.clock_stretching);
        self.own_address = config.own_address;
        self.slave_transmitting = false;
        self.end_master();

        debug!("i2c configured at {} Hz", config.frequency);
        Ok(())
    }

    fn arm(&mut self, direction: Direction, _len: usize) -> Phase {
        self.active = Some(direction);
        self.awaiting_address = true;
        self.tx_enabled = direction == Direction::Write;
        self.regs.set_ack(true);
        self.regs.set_interrupt(I2cInterrupt::Event, true);
        self.regs.set_interrupt(I2cInterrupt::Buffer, true);
        self.regs.set_interrupt(I2cInterrupt::Error, true);
        self.regs.generate_start();
        Phase::Address
    }

    fn poll(&mut self) -> Option<BusEvent> {
        let status = self.regs.status();

        if status.bus_error {
            self.regs.clear(I2cFlag::BusError);
            return Some(BusEvent::Fault(Fault::BusError));
        }
        if status.arbitration_lost {
            self.regs.clear(I2cFlag::ArbitrationLost);
            return Some(BusEvent::Fault(Fault::ArbitrationLost));
        }

        if !status.master || self.active.is_none() {
            return self.poll_slave(&status);
        }

        if status.nack {
            self.regs.clear(I2cFlag::Nack);
            let fault = if self.awaiting_address {
                Fault::AddressNack
            } else {
                Fault::Nack
            };
            return Some(BusEvent::Fault(fault));
        }
        if status.start_sent {
            // Cleared by the address write that follows
            return Some(BusEvent::StartSent);
        }
        if status.address_matched {
            self.regs.clear(I2cFlag::Address);
            self.awaiting_address = false;
            return Some(BusEvent::AddressAcked);
        }
        if status.rx_not_empty {
            return Some(BusEvent::RxReady(self.regs.read_data()));
        }
        if status.tx_empty && self.tx_enabled && !self.awaiting_address {
            return Some(BusEvent::TxReady);
        }
        None
    }

    fn send_address(&mut self, direction: Direction) {
        let rw = match direction {
            Direction::Read => 1,
            Direction::Write => 0,
        };
        self.regs.write_data((self.target << 1) | rw);
    }

    fn write_unit(&mut self, byte: u8) {
        self.regs.write_data(byte);
    }

    fn before_last_read(&mut self) {
        self.regs.set_ack(false);
        self.regs.generate_stop();
    }

    fn tx_idle(&mut self, _read_active: bool) {
        self.tx_enabled = false;
    }

    fn finish(&mut self, direction: Direction) {
        // Reads already requested STOP ahead of the last unit
        if direction == Direction::Write {
            self.regs.generate_stop();
        }
        self.end_master();
    }

    fn abort(&mut self, direction: Direction) {
        if self.active == Some(direction) {
            // Release the bus; harmless after arbitration loss
            self.regs.generate_stop();
            self.end_master();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use hierodule_core::{Notice, TransferState};
    use hierodule_hal::i2c::I2cStatus;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// Bus conditions the mock produces in response to register writes
    #[derive(Default)]
    pub(crate) struct MockI2c {
        pub status: I2cStatus,
        /// Target answers its address with ACK
        pub target_present: bool,
        /// Units the target returns on reads
        pub target_data: VecDeque<u8>,
        /// Units written by the master after the address
        pub written: Vec<u8>,
        pub addresses: Vec<u8>,
        pub ack: bool,
        pub stops: usize,
        pub stretching: bool,
        pub event_irq: bool,
        rx: Option<u8>,
    }

    impl MockI2c {
        fn clock_in_next(&mut self) {
            if self.status.master && !self.status.start_sent && !self.status.address_matched {
                self.rx = self.target_data.pop_front();
            }
        }
    }

    impl I2cRegisters for MockI2c {
        fn apply_config(&mut self, _config: &I2cConfig) {}

        fn status(&self) -> I2cStatus {
            I2cStatus {
                rx_not_empty: self.rx.is_some() || self.status.rx_not_empty,
                ..self.status
            }
        }

        fn read_data(&mut self) -> u8 {
            if let Some(byte) = self.rx.take() {
                if self.ack {
                    self.clock_in_next();
                }
                return byte;
            }
            self.status.rx_not_empty = false;
            0
        }

        fn write_data(&mut self, byte: u8) {
            if self.status.start_sent {
                self.status.start_sent = false;
                self.addresses.push(byte);
                if self.target_present {
                    self.status.address_matched = true;
                } else {
                    self.status.nack = true;
                }
            } else {
                self.written.push(byte);
                self.status.tx_empty = true;
            }
        }

        fn generate_start(&mut self) {
            self.status.master = true;
            self.status.start_sent = true;
            self.status.tx_empty = false;
        }

        fn generate_stop(&mut self) {
            self.stops += 1;
        }

        fn set_ack(&mut self, ack: bool) {
            self.ack = ack;
        }

        fn set_interrupt(&mut self, source: I2cInterrupt, enabled: bool) {
            if source == I2cInterrupt::Event {
                self.event_irq = enabled;
            }
        }

        fn set_clock_stretching(&mut self, enabled: bool) {
            self.stretching = enabled;
        }

        fn clear(&mut self, flag: I2cFlag) {
            match flag {
                I2cFlag::Address => {
                    self.status.address_matched = false;
                    if self.status.master {
                        // Address accepted: start moving data
                        let reading = self.addresses.last().is_some_and(|a| a & 1 == 1);
                        if reading {
                            self.clock_in_next();
                        } else {
                            self.status.tx_empty = true;
                        }
                    }
                }
                I2cFlag::Nack => self.status.nack = false,
                I2cFlag::ArbitrationLost => self.status.arbitration_lost = false,
                I2cFlag::BusError => self.status.bus_error = false,
                I2cFlag::Stop => self.status.stop_detected = false,
            }
        }
    }

    pub(crate) fn i2c(regs: MockI2c, config: I2cConfig) -> I2cDriver<MockI2c, 16> {
        let mut driver = Driver::new(I2c::new(regs));
        driver.configure(&config).unwrap();
        driver
    }

    fn regs(driver: &mut I2cDriver<MockI2c, 16>) -> &mut MockI2c {
        driver.protocol_mut().registers_mut()
    }

    #[test]
    fn test_address_nack_before_data_phase() {
        let mut driver = i2c(MockI2c::default(), I2cConfig::STANDARD);
        driver.protocol_mut().set_target(0x50).unwrap();
        let handle = driver.read_async(4, Some(100), None).unwrap();

        // Service the START, then the NACK that answers the address
        driver.on_interrupt();

        let mut out = [0u8; 4];
        assert_eq!(
            driver.take(handle, &mut out),
            Err(Error::HardwareFault {
                fault: Fault::AddressNack,
                transferred: 0
            })
        );
        assert_eq!(regs(&mut driver).addresses, [0xA1]);
        assert_eq!(regs(&mut driver).stops, 1);
    }

    #[test]
    fn test_master_read_nacks_last() {
        let regs_in = MockI2c {
            target_present: true,
            target_data: VecDeque::from([0x11, 0x22, 0x33]),
            ..Default::default()
        };
        let mut driver = i2c(regs_in, I2cConfig::FAST);
        driver.protocol_mut().set_target(0x48).unwrap();

        let handle = driver.read_async(3, None, None).unwrap();
        driver.on_interrupt();

        let mut out = [0u8; 3];
        assert_eq!(driver.take(handle, &mut out), Ok(3));
        assert_eq!(out, [0x11, 0x22, 0x33]);
        assert_eq!(regs(&mut driver).addresses, [0x91]);
        // STOP requested once, ahead of the last unit
        assert_eq!(regs(&mut driver).stops, 1);
        // ACK restored for the next transfer
        assert!(regs(&mut driver).ack);
    }

    #[test]
    fn test_master_write_then_stop() {
        let regs_in = MockI2c {
            target_present: true,
            ..Default::default()
        };
        let mut driver = i2c(regs_in, I2cConfig::FAST);
        let handle = driver.write_to(0x3C, &[0x00, 0xAF], None, None).unwrap();
        driver.on_interrupt();

        assert_eq!(driver.status(handle).unwrap().state, TransferState::Complete);
        assert_eq!(regs(&mut driver).addresses, [0x78]);
        assert_eq!(regs(&mut driver).written, [0x00, 0xAF]);
        assert_eq!(regs(&mut driver).stops, 1);
    }

    #[test]
    fn test_half_duplex_busy() {
        let mut driver = i2c(MockI2c::default(), I2cConfig::STANDARD);
        driver.read_async(2, None, None).unwrap();

        assert_eq!(driver.write_async(&[1], None, None), Err(Error::Busy));
        assert_eq!(driver.protocol_mut().set_target(0x10), Err(Error::Busy));
    }

    #[test]
    fn test_arbitration_lost_releases_bus() {
        let mut driver = i2c(MockI2c::default(), I2cConfig::STANDARD);
        let handle = driver.write_async(&[1, 2], None, None).unwrap();

        regs(&mut driver).status.start_sent = false;
        regs(&mut driver).status.arbitration_lost = true;
        driver.on_interrupt();

        assert_eq!(
            driver.status(handle).unwrap().state,
            TransferState::Error(Fault::ArbitrationLost)
        );
        assert!(driver.write_async(&[1], None, None).is_ok());
    }

    #[test]
    fn test_slave_receive_then_stop() {
        static DONE: AtomicUsize = AtomicUsize::new(0);

        fn on_notice(notice: Notice) {
            if notice == Notice::SlaveDone(Direction::Read) {
                DONE.fetch_add(1, Ordering::SeqCst);
            }
        }

        let config = I2cConfig::STANDARD.with_own_address(0x2A);
        let mut driver = i2c(MockI2c::default(), config);
        driver.set_listener(Some(on_notice));
        assert!(regs(&mut driver).event_irq);

        regs(&mut driver).status.address_matched = true;
        regs(&mut driver).rx = Some(0x5A);
        driver.on_interrupt();
        regs(&mut driver).rx = Some(0x5B);
        regs(&mut driver).status.stop_detected = true;
        driver.on_interrupt();

        assert_eq!(driver.next_byte(), Some(0x5A));
        assert_eq!(driver.next_byte(), Some(0x5B));
        assert_eq!(DONE.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slave_transmit_pads_after_response() {
        static DONE: AtomicUsize = AtomicUsize::new(0);

        fn on_notice(notice: Notice) {
            if notice == Notice::SlaveDone(Direction::Write) {
                DONE.fetch_add(1, Ordering::SeqCst);
            }
        }

        let config = I2cConfig::STANDARD.with_own_address(0x2A);
        let mut driver = i2c(MockI2c::default(), config);
        driver.set_listener(Some(on_notice));
        driver.protocol_mut().set_slave_response(&[0xC0]).unwrap();

        {
            let regs = regs(&mut driver);
            regs.status.address_matched = true;
            regs.status.slave_transmitter = true;
            regs.status.tx_empty = true;
        }
        driver.on_interrupt();
        driver.on_interrupt();
        assert_eq!(regs(&mut driver).written, [0xC0, SLAVE_PAD]);

        regs(&mut driver).status.tx_empty = false;
        regs(&mut driver).status.nack = true;
        driver.on_interrupt();
        assert_eq!(DONE.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slave_response_capacity() {
        let mut protocol = I2c::new(MockI2c::default());
        let long = [0u8; SLAVE_RESPONSE_CAPACITY + 1];
        assert_eq!(protocol.set_slave_response(&long), Err(Error::TooLong));
    }

    #[test]
    fn test_clock_stretching_applied() {
        let config = I2cConfig {
            clock_stretching: false,
            ..I2cConfig::FAST
        };
        let mut driver = i2c(MockI2c::default(), config);
        assert!(!regs(&mut driver).stretching);
    }
}
