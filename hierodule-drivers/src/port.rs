//! Blocking ports for the embedded-hal and embedded-io ecosystems
//!
//! A [`Port`] borrows a [`Shared`] driver together with a time base and
//! an idle strategy, and turns each trait call into one or more
//! descriptor transfers that it waits out before returning. Requests
//! longer than the descriptor capacity `N` are split into `N`-unit
//! chunks.
//!
//! I2C transactions run every operation as its own START/STOP transfer.
//! Devices that require a repeated START between a register write and
//! the following read are not served by this port.

use core::fmt;

use embedded_hal::i2c::{self as hal_i2c, NoAcknowledgeSource};
use embedded_hal::spi as hal_spi;
use embedded_io::{ErrorKind as IoErrorKind, ErrorType, Read, Write};
use hierodule_core::{BusProtocol, Driver, Error, Fault, Handle, Result, Shared};
use hierodule_hal::i2c::I2cRegisters;
use hierodule_hal::spi::SpiRegisters;
use hierodule_hal::uart::UsartRegisters;
use hierodule_hal::time::elapsed;
use hierodule_hal::{Idle, InterruptLine, TimeBase};

use crate::i2c::{I2c, I2cMaster};
use crate::spi::Spi;
use crate::usart::Usart;

/// Engine error carried through the ecosystem traits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortError(pub Error);

impl From<Error> for PortError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

fn fault_of(err: &Error) -> Option<Fault> {
    match err {
        Error::HardwareFault { fault, .. } => Some(*fault),
        _ => None,
    }
}

impl embedded_io::Error for PortError {
    fn kind(&self) -> IoErrorKind {
        match self.0 {
            Error::Timeout { .. } => IoErrorKind::TimedOut,
            Error::HardwareFault {
                fault: Fault::Framing | Fault::Parity | Fault::Noise,
                ..
            } => IoErrorKind::InvalidData,
            Error::Cancelled { .. } => IoErrorKind::Interrupted,
            Error::TooLong | Error::InvalidConfig(_) => IoErrorKind::InvalidInput,
            _ => IoErrorKind::Other,
        }
    }
}

impl hal_i2c::Error for PortError {
    fn kind(&self) -> hal_i2c::ErrorKind {
        match fault_of(&self.0) {
            Some(Fault::AddressNack) => {
                hal_i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            Some(Fault::Nack) => hal_i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Some(Fault::ArbitrationLost) => hal_i2c::ErrorKind::ArbitrationLoss,
            Some(Fault::BusError) => hal_i2c::ErrorKind::Bus,
            Some(Fault::Overrun) => hal_i2c::ErrorKind::Overrun,
            _ => hal_i2c::ErrorKind::Other,
        }
    }
}

impl hal_spi::Error for PortError {
    fn kind(&self) -> hal_spi::ErrorKind {
        match fault_of(&self.0) {
            Some(Fault::ModeFault) => hal_spi::ErrorKind::ModeFault,
            Some(Fault::Overrun) => hal_spi::ErrorKind::Overrun,
            _ => hal_spi::ErrorKind::Other,
        }
    }
}

/// Blocking view of a shared bus driver
pub struct Port<'a, P: BusProtocol, L, T, I, const N: usize> {
    shared: &'a Shared<Driver<P, N>, L>,
    time: T,
    idle: I,
    timeout: u32,
}

pub type SerialPort<'a, R, L, T, I, const N: usize> = Port<'a, Usart<R>, L, T, I, N>;
pub type SpiPort<'a, R, L, T, I, const N: usize> = Port<'a, Spi<R>, L, T, I, N>;
pub type I2cPort<'a, R, L, T, I, const N: usize> = Port<'a, I2c<R>, L, T, I, N>;

impl<'a, P, L, T, I, const N: usize> Port<'a, P, L, T, I, N>
where
    P: BusProtocol,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    /// Wrap `shared`, bounding each chunk by `timeout` ticks
    pub fn new(shared: &'a Shared<Driver<P, N>, L>, time: T, idle: I, timeout: u32) -> Self {
        Self {
            shared,
            time,
            idle,
            timeout,
        }
    }

    pub fn set_timeout(&mut self, timeout: u32) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn shared(&self) -> &'a Shared<Driver<P, N>, L> {
        self.shared
    }

    /// Start one transfer, wait it out and collect its result into `out`
    fn complete(
        &mut self,
        start: impl FnOnce(&mut Driver<P, N>) -> Result<Handle>,
        out: &mut [u8],
    ) -> Result<usize> {
        let now = self.time.current_tick();
        let handle = self.shared.lock(|d| {
            d.on_tick(now);
            start(d)
        })?;
        self.shared.wait_blocking(handle, &self.time, &mut self.idle)?;
        self.shared.lock(|d| d.take(handle, out))
    }
}

impl<'a, R, L, T, I, const N: usize> SerialPort<'a, R, L, T, I, N>
where
    R: UsartRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    /// Serial port that keeps the receiver listening
    ///
    /// Bytes arriving between calls are queued in the driver's ring and
    /// returned by the next `read`.
    pub fn serial(
        shared: &'a Shared<Driver<Usart<R>, N>, L>,
        time: T,
        idle: I,
        timeout: u32,
    ) -> Self {
        shared.lock(|d| d.listen(true));
        Self::new(shared, time, idle, timeout)
    }
}

impl<R, L, T, I, const N: usize> ErrorType for SerialPort<'_, R, L, T, I, N>
where
    R: UsartRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    type Error = PortError;
}

impl<R, L, T, I, const N: usize> Read for SerialPort<'_, R, L, T, I, N>
where
    R: UsartRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    /// Return whatever is queued, waiting up to the timeout for a first byte
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, PortError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let start = self.time.current_tick();
        loop {
            let count = self.shared.lock(|d| d.read_buffered(buf));
            if count > 0 {
                return Ok(count);
            }
            if elapsed(start, self.time.current_tick()) >= self.timeout {
                return Err(PortError(Error::Timeout { transferred: 0 }));
            }
            self.idle.wait_for_interrupt();
        }
    }
}

impl<R, L, T, I, const N: usize> Write for SerialPort<'_, R, L, T, I, N>
where
    R: UsartRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, PortError> {
        let chunk = &buf[..buf.len().min(N)];
        let timeout = self.timeout;
        Ok(self.complete(|d| d.write_async(chunk, Some(timeout), None), &mut [])?)
    }

    /// Writes complete once their last unit is loaded; nothing is pending
    fn flush(&mut self) -> core::result::Result<(), PortError> {
        Ok(())
    }
}

impl<R, L, T, I, const N: usize> hal_i2c::ErrorType for I2cPort<'_, R, L, T, I, N>
where
    R: I2cRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    type Error = PortError;
}

impl<R, L, T, I, const N: usize> hal_i2c::I2c for I2cPort<'_, R, L, T, I, N>
where
    R: I2cRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [hal_i2c::Operation<'_>],
    ) -> core::result::Result<(), PortError> {
        let timeout = self.timeout;
        for operation in operations {
            match operation {
                hal_i2c::Operation::Read(buf) => {
                    for chunk in buf.chunks_mut(N) {
                        let len = chunk.len();
                        self.complete(|d| d.read_from(address, len, Some(timeout), None), chunk)?;
                    }
                }
                hal_i2c::Operation::Write(bytes) => {
                    for chunk in bytes.chunks(N) {
                        self.complete(|d| d.write_to(address, chunk, Some(timeout), None), &mut [])?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<'a, R, L, T, I, const N: usize> SpiPort<'a, R, L, T, I, N>
where
    R: SpiRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    /// Arm a read of `read_len` and a write of `bytes` under one lock
    fn start_exchange(&mut self, read_len: usize, bytes: &[u8]) -> Result<(Handle, Handle)> {
        let now = self.time.current_tick();
        let timeout = self.timeout;
        self.shared.lock(|d| {
            d.on_tick(now);
            let read = d.read_async(read_len, Some(timeout), None)?;
            match d.write_async(bytes, Some(timeout), None) {
                Ok(write) => Ok((read, write)),
                Err(err) => {
                    let _ = d.cancel(read);
                    let _ = d.take(read, &mut []);
                    Err(err)
                }
            }
        })
    }

    fn finish_exchange(&mut self, (read, write): (Handle, Handle), out: &mut [u8]) -> Result<()> {
        self.shared.wait_blocking(read, &self.time, &mut self.idle)?;
        self.shared.wait_blocking(write, &self.time, &mut self.idle)?;
        let result = self.shared.lock(|d| {
            let read_result = d.take(read, out);
            let write_result = d.take(write, &mut []);
            // Units clocked in past the read's length are junk
            d.discard_buffered();
            read_result.and(write_result)
        });
        result.map(|_| ())
    }
}

impl<R, L, T, I, const N: usize> hal_spi::ErrorType for SpiPort<'_, R, L, T, I, N>
where
    R: SpiRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    type Error = PortError;
}

impl<R, L, T, I, const N: usize> hal_spi::SpiBus<u8> for SpiPort<'_, R, L, T, I, N>
where
    R: SpiRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    fn read(&mut self, words: &mut [u8]) -> core::result::Result<(), PortError> {
        let timeout = self.timeout;
        for chunk in words.chunks_mut(N) {
            let len = chunk.len();
            self.complete(|d| d.read_async(len, Some(timeout), None), chunk)?;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> core::result::Result<(), PortError> {
        let timeout = self.timeout;
        for chunk in words.chunks(N) {
            self.complete(|d| d.write_async(chunk, Some(timeout), None), &mut [])?;
            self.shared.lock(|d| d.discard_buffered());
        }
        Ok(())
    }

    /// Clock `max(read.len(), write.len())` units
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> core::result::Result<(), PortError> {
        let total = read.len().max(write.len());
        let mut offset = 0;
        while offset < total {
            let end = offset + N;
            let read_len = read.len();
            let read_part = &mut read[offset.min(read_len)..end.min(read_len)];
            let write_part = &write[offset.min(write.len())..end.min(write.len())];

            let handles = self.start_exchange(read_part.len(), write_part)?;
            self.finish_exchange(handles, read_part)?;
            offset += N;
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> core::result::Result<(), PortError> {
        for chunk in words.chunks_mut(N) {
            // The write descriptor owns a copy, so the chunk can receive
            let handles = self.start_exchange(chunk.len(), chunk)?;
            self.finish_exchange(handles, chunk)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> core::result::Result<(), PortError> {
        Ok(())
    }
}
