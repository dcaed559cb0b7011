//! Bus driver engine
//!
//! The interrupt-driven read/write machinery shared by USART, SPI and
//! I2C. The engine owns the transfer descriptors, the receive ring and
//! the state machine; everything peripheral-specific (which register
//! bits to set, how to decode a status word, how to address a target)
//! is delegated to a [`BusProtocol`] strategy.
//!
//! # Interrupt entry
//!
//! [`Driver::on_interrupt`] asks the strategy for pending conditions one
//! at a time and applies each to the matching descriptor. The loop is
//! bounded by [`MAX_EVENTS_PER_ENTRY`] so an entry never runs unbounded
//! even if a flag refuses to clear.

use crate::error::{Error, Fault, Result};
use crate::ring::RingBuffer;
use crate::state::{Phase, TransferEvent, TransferState};
use crate::transfer::{Callback, Direction, Handle, TransferDescriptor, TransferStatus};
use crate::PeripheralDriver;

/// Upper bound on hardware conditions handled per interrupt entry
pub const MAX_EVENTS_PER_ENTRY: usize = 16;

/// One decoded hardware condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    /// A unit was received
    RxReady(u8),
    /// The transmit register can take a unit
    TxReady,
    /// START condition is on the bus
    StartSent,
    /// The addressed target acknowledged
    AddressAcked,
    /// The hardware reported a fault
    Fault(Fault),
    /// A transfer driven by an external master ended
    ///
    /// `Read` means the master wrote to us, `Write` means it read from us.
    SlaveDone(Direction),
}

/// Asynchronous notification delivered from interrupt context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notice {
    /// A unit arrived with no read armed and was queued
    Received(u8),
    /// A slave-mode transfer ended
    SlaveDone(Direction),
}

/// Receive notification hook
pub type Listener = fn(Notice);

/// Peripheral-specific half of a bus driver
pub trait BusProtocol {
    /// Peripheral configuration
    type Config;

    /// Only one transfer in either direction at a time
    const HALF_DUPLEX: bool = false;

    /// Validate and apply configuration, leaving every interrupt source off
    fn configure(&mut self, config: &Self::Config) -> Result<()>;

    /// Enable the interrupt sources for a transfer of `len` units
    ///
    /// Returns the phase the transfer begins in; addressed buses begin
    /// in [`Phase::Address`] and emit a START here.
    fn arm(&mut self, direction: Direction, len: usize) -> Phase;

    /// Read and clear one pending condition
    fn poll(&mut self) -> Option<BusEvent>;

    /// Put the target address on the bus after a START
    fn send_address(&mut self, _direction: Direction) {}

    /// Load one unit into the transmit register
    fn write_unit(&mut self, byte: u8);

    /// The next unit received is the last of the read
    fn before_last_read(&mut self) {}

    /// Transmit register empty with no write armed
    fn tx_idle(&mut self, read_active: bool);

    /// Transfer in `direction` completed
    fn finish(&mut self, direction: Direction);

    /// Transfer in `direction` ended abnormally
    fn abort(&mut self, direction: Direction);

    /// Keep receiving while no read is armed
    fn listen(&mut self, _enabled: bool) {}
}

/// Interrupt-driven driver for one peripheral instance
///
/// `N` bounds both the longest single transfer and the receive ring.
pub struct Driver<P: BusProtocol, const N: usize> {
    protocol: P,
    configured: bool,
    read: Option<TransferDescriptor<N>>,
    write: Option<TransferDescriptor<N>>,
    ring: RingBuffer<N>,
    listener: Option<Listener>,
    dropped: u32,
    next_id: u16,
    /// Last tick observed, used as the start tick of new transfers
    now: u32,
}

impl<P: BusProtocol, const N: usize> Driver<P, N> {
    /// Wrap a strategy; the driver must be configured before use
    pub const fn new(protocol: P) -> Self {
        Self {
            protocol,
            configured: false,
            read: None,
            write: None,
            ring: RingBuffer::new(),
            listener: None,
            dropped: 0,
            next_id: 0,
            now: 0,
        }
    }

    /// Apply configuration and reset to idle
    ///
    /// Active transfers are aborted without notification and queued
    /// receive bytes are discarded.
    pub fn configure(&mut self, config: &P::Config) -> Result<()> {
        for direction in [Direction::Read, Direction::Write] {
            if self.slot(direction).as_ref().is_some_and(|d| d.is_active()) {
                self.protocol.abort(direction);
            }
            *self.slot_mut(direction) = None;
        }
        self.ring.clear();
        self.configured = false;

        self.protocol.configure(config)?;
        self.configured = true;
        info!("bus driver configured");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Start a read of `len` units
    pub fn read_async(
        &mut self,
        len: usize,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle> {
        self.check_start(Direction::Read)?;
        let handle = self.allocate(Direction::Read);
        let desc = TransferDescriptor::read(handle, len, self.now, timeout, callback)?;
        self.start(desc)
    }

    /// Start a write of `bytes`
    pub fn write_async(
        &mut self,
        bytes: &[u8],
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle> {
        self.check_start(Direction::Write)?;
        let handle = self.allocate(Direction::Write);
        let desc = TransferDescriptor::write(handle, bytes, self.now, timeout, callback)?;
        self.start(desc)
    }

    fn check_start(&self, direction: Direction) -> Result<()> {
        if !self.configured {
            return Err(Error::NotConfigured);
        }
        if self.is_active(direction) || (P::HALF_DUPLEX && self.is_active(direction.opposite())) {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn allocate(&mut self, direction: Direction) -> Handle {
        self.next_id = self.next_id.wrapping_add(1);
        Handle {
            direction,
            id: self.next_id,
        }
    }

    fn start(&mut self, mut desc: TransferDescriptor<N>) -> Result<Handle> {
        let handle = desc.handle();
        desc.apply(TransferEvent::Start);

        if desc.requested() == 0 {
            // Nothing to move
            desc.apply(TransferEvent::LastUnit);
            desc.notify();
        } else {
            let phase = self.protocol.arm(handle.direction, desc.requested());
            debug!(
                "armed {} of {} units in {} phase",
                handle.direction,
                desc.requested(),
                phase
            );
        }

        *self.slot_mut(handle.direction) = Some(desc);
        Ok(handle)
    }

    /// Cancel a transfer
    ///
    /// An active transfer ends as `Cancelled` with its partial count. A
    /// transfer that already reached an outcome keeps it.
    pub fn cancel(&mut self, handle: Handle) -> Result<()> {
        let desc = self.find_mut(handle)?;
        if !desc.is_active() {
            return Ok(());
        }
        desc.apply(TransferEvent::Cancel);
        desc.notify();
        self.protocol.abort(handle.direction);
        debug!("cancelled {}", handle.direction);
        Ok(())
    }

    /// Progress of a transfer
    pub fn status(&self, handle: Handle) -> Result<TransferStatus> {
        self.find(handle).map(|d| d.status())
    }

    /// Collect a finished transfer and release its slot
    ///
    /// Received bytes (including a partial read's) are copied to `out`.
    /// Returns the unit count on success, or the terminal error.
    pub fn take(&mut self, handle: Handle, out: &mut [u8]) -> Result<usize> {
        let desc = self.find(handle)?;
        if desc.is_active() {
            return Err(Error::Busy);
        }
        if handle.direction == Direction::Read {
            let data = desc.data();
            if data.len() > out.len() {
                return Err(Error::TooLong);
            }
            out[..data.len()].copy_from_slice(data);
        }
        let outcome = desc.outcome();
        *self.slot_mut(handle.direction) = None;
        outcome
    }

    /// Pop one unit queued while no read was armed
    pub fn next_byte(&mut self) -> Option<u8> {
        self.ring.pop()
    }

    /// Drain queued units into `out`
    pub fn read_buffered(&mut self, out: &mut [u8]) -> usize {
        self.ring.pop_into(out)
    }

    /// Units waiting in the receive ring
    pub fn buffered(&self) -> usize {
        self.ring.available()
    }

    /// Drop everything waiting in the receive ring
    pub fn discard_buffered(&mut self) {
        self.ring.clear();
    }

    /// Keep receiving into the ring while no read is armed
    pub fn listen(&mut self, enabled: bool) {
        self.protocol.listen(enabled);
    }

    /// Install or remove the receive notification hook
    pub fn set_listener(&mut self, listener: Option<Listener>) {
        self.listener = listener;
    }

    /// Units lost to a full ring or to faults while only listening
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Service the peripheral's interrupt
    pub fn on_interrupt(&mut self) {
        for _ in 0..MAX_EVENTS_PER_ENTRY {
            let Some(event) = self.protocol.poll() else {
                return;
            };
            trace!("bus event {}", event);
            self.handle_event(event);
        }
        warn!("interrupt entry hit event bound");
    }

    /// Expire transfers whose timeout elapsed by tick `now`
    pub fn on_tick(&mut self, now: u32) {
        self.now = now;
        for direction in [Direction::Read, Direction::Write] {
            let Some(desc) = self.slot_mut(direction) else {
                continue;
            };
            if desc.expired(now) {
                desc.apply(TransferEvent::Expired);
                desc.notify();
                warn!("{} timed out after {} units", direction, desc.transferred());
                self.protocol.abort(direction);
            }
        }
    }

    fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::RxReady(byte) => self.on_received(byte),
            BusEvent::TxReady => self.on_transmit_ready(),
            BusEvent::StartSent => {
                if let Some(direction) = self.active_direction() {
                    self.advance(direction, TransferEvent::StartSent);
                    self.protocol.send_address(direction);
                }
            }
            BusEvent::AddressAcked => {
                if let Some(direction) = self.active_direction() {
                    self.advance(direction, TransferEvent::AddressAcked);
                    let single = self
                        .slot(direction)
                        .as_ref()
                        .is_some_and(|d| d.requested() == 1);
                    if direction == Direction::Read && single {
                        self.protocol.before_last_read();
                    }
                }
            }
            BusEvent::Fault(fault) => self.on_fault(fault),
            BusEvent::SlaveDone(direction) => {
                debug!("slave {} done", direction);
                self.notify_listener(Notice::SlaveDone(direction));
            }
        }
    }

    fn on_received(&mut self, byte: u8) {
        let Some(desc) = self.read.as_mut().filter(|d| d.is_active()) else {
            if self.ring.push(byte).is_err() {
                self.dropped = self.dropped.saturating_add(1);
            }
            self.notify_listener(Notice::Received(byte));
            return;
        };

        match desc.store(byte) {
            TransferState::Complete => {
                desc.notify();
                self.protocol.finish(Direction::Read);
            }
            _ if desc.remaining() == 1 => self.protocol.before_last_read(),
            _ => {}
        }
    }

    fn on_transmit_ready(&mut self) {
        let Some(desc) = self.write.as_mut().filter(|d| d.is_active()) else {
            let read_active = self.is_active(Direction::Read);
            self.protocol.tx_idle(read_active);
            return;
        };

        if let Some(byte) = desc.next_unit() {
            self.protocol.write_unit(byte);
            if desc.is_terminal() {
                desc.notify();
                self.protocol.finish(Direction::Write);
            }
        }
    }

    fn on_fault(&mut self, fault: Fault) {
        let failed = if fault.is_receive_side() {
            self.fail(Direction::Read, fault)
        } else {
            let read = self.fail(Direction::Read, fault);
            let write = self.fail(Direction::Write, fault);
            read || write
        };

        if !failed {
            self.dropped = self.dropped.saturating_add(1);
            warn!("{} with no transfer active", fault);
        }
    }

    fn fail(&mut self, direction: Direction, fault: Fault) -> bool {
        let Some(desc) = self.slot_mut(direction).as_mut().filter(|d| d.is_active()) else {
            return false;
        };
        desc.apply(TransferEvent::Fault(fault));
        desc.notify();
        error!("{} failed: {}", direction, fault);
        self.protocol.abort(direction);
        true
    }

    fn advance(&mut self, direction: Direction, event: TransferEvent) {
        if let Some(desc) = self.slot_mut(direction) {
            desc.apply(event);
        }
    }

    fn notify_listener(&self, notice: Notice) {
        if let Some(listener) = self.listener {
            listener(notice);
        }
    }

    fn is_active(&self, direction: Direction) -> bool {
        self.slot(direction).as_ref().is_some_and(|d| d.is_active())
    }

    fn active_direction(&self) -> Option<Direction> {
        [Direction::Read, Direction::Write]
            .into_iter()
            .find(|&direction| self.is_active(direction))
    }

    fn slot(&self, direction: Direction) -> &Option<TransferDescriptor<N>> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Option<TransferDescriptor<N>> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn find(&self, handle: Handle) -> Result<&TransferDescriptor<N>> {
        self.slot(handle.direction)
            .as_ref()
            .filter(|d| d.handle() == handle)
            .ok_or(Error::NotFound)
    }

    fn find_mut(&mut self, handle: Handle) -> Result<&mut TransferDescriptor<N>> {
        self.slot_mut(handle.direction)
            .as_mut()
            .filter(|d| d.handle() == handle)
            .ok_or(Error::NotFound)
    }
}

impl<P: BusProtocol, const N: usize> PeripheralDriver for Driver<P, N> {
    fn on_interrupt(&mut self) {
        Driver::on_interrupt(self)
    }

    fn on_tick(&mut self, now: u32) {
        Driver::on_tick(self, now)
    }

    fn status(&self, handle: Handle) -> Result<TransferStatus> {
        Driver::status(self, handle)
    }

    fn cancel(&mut self, handle: Handle) -> Result<()> {
        Driver::cancel(self, handle)
    }
}
