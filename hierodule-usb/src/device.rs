//! USB device driver
//!
//! Owns the device controller: endpoint 0 control transfers, the
//! standard requests every device answers, and one pair of bulk data
//! endpoints carrying a byte stream.
//!
//! # Device states
//!
//! `Default` after a bus reset, `Addressed` once a SET_ADDRESS status
//! stage completes, `Configured` after SET_CONFIGURATION(1). Suspend
//! parks the device in `Suspended` and resume returns to the previous
//! state.
//!
//! # Bulk data
//!
//! OUT packets on [`DATA_ENDPOINT`] fill an armed read (`read_async`)
//! first and the receive ring after it. The endpoint is only re-armed
//! while the ring has room for a whole packet, so a slow reader makes the
//! host wait instead of losing data.
//!
//! IN transfers (`write_async`) are sent packet by packet and count a
//! packet only once the host ACKs it. A transfer that fills its last
//! packet exactly is followed by a zero-length packet and completes on
//! that packet's ACK. The endpoint takes no new write while a packet is
//! still loaded, so consecutive writes never share a data toggle.

use hierodule_core::engine::MAX_EVENTS_PER_ENTRY;
use hierodule_core::{
    Callback, Direction, Error, Fault, Handle, Listener, Notice, PeripheralDriver, Result,
    RingBuffer, Shared, TransferDescriptor, TransferEvent, TransferState, TransferStatus,
};
use hierodule_hal::usb::{EndpointAddress, Toggle, UsbConfig, UsbEvent, UsbRegisters};
use hierodule_hal::{Idle, InterruptLine, TimeBase};

use crate::control::{
    Completed, ControlPipe, HandlerRegistry, Rejected, Request, RequestHandler, Requests,
};
use crate::endpoint::{EndpointState, MAX_PACKET_SIZE};
use crate::setup::{feature, request, Recipient, RequestKind, SetupPacket};

/// Endpoint number of the bulk data pair
pub const DATA_ENDPOINT: u8 = 1;

/// The single configuration the device offers
pub const CONFIGURATION_VALUE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    #[default]
    Default,
    Addressed,
    Configured,
    Suspended,
}

/// Standard requests answered by the device itself
///
/// Everything else goes to the handler registry.
struct Standard<'a> {
    state: &'a mut DeviceState,
    configuration: &'a mut u8,
    pending_address: &'a mut Option<u8>,
    bulk_in: &'a mut EndpointState,
    bulk_out: &'a mut EndpointState,
    handlers: &'a HandlerRegistry,
}

impl Standard<'_> {
    fn endpoint(&mut self, address: EndpointAddress) -> Option<&mut EndpointState> {
        if address == EndpointAddress::in_ep(DATA_ENDPOINT) {
            Some(&mut *self.bulk_in)
        } else if address == EndpointAddress::out_ep(DATA_ENDPOINT) {
            Some(&mut *self.bulk_out)
        } else {
            None
        }
    }
}

/// Endpoint named by wIndex; its high byte is reserved
fn endpoint_index(setup: &SetupPacket) -> core::result::Result<EndpointAddress, Rejected> {
    u8::try_from(setup.index)
        .map(EndpointAddress)
        .map_err(|_| Rejected)
}

fn respond(buf: &mut [u8], bytes: &[u8]) -> core::result::Result<usize, Rejected> {
    let out = buf.get_mut(..bytes.len()).ok_or(Rejected)?;
    out.copy_from_slice(bytes);
    Ok(bytes.len())
}

impl<R: UsbRegisters> Requests<R> for Standard<'_> {
    fn resolve(
        &mut self,
        regs: &mut R,
        setup: &SetupPacket,
        request: Request<'_>,
    ) -> core::result::Result<usize, Rejected> {
        if setup.kind() != RequestKind::Standard {
            return self.handlers.dispatch(setup, request);
        }

        match (setup.recipient(), setup.request, request) {
            (Recipient::Device, request::SET_ADDRESS, Request::NoData) => {
                if setup.value > 0x7F || *self.state == DeviceState::Configured {
                    return Err(Rejected);
                }
                // Takes effect after the status stage
                *self.pending_address = Some(setup.value as u8);
                Ok(0)
            }
            (Recipient::Device, request::SET_CONFIGURATION, Request::NoData) => {
                match (*self.state, setup.value) {
                    (DeviceState::Default, _) => Err(Rejected),
                    (_, 0) => {
                        *self.state = DeviceState::Addressed;
                        *self.configuration = 0;
                        Ok(0)
                    }
                    (_, value) if value == u16::from(CONFIGURATION_VALUE) => {
                        *self.state = DeviceState::Configured;
                        *self.configuration = CONFIGURATION_VALUE;
                        self.bulk_in.reset();
                        self.bulk_out.reset();
                        regs.set_stall(EndpointAddress::in_ep(DATA_ENDPOINT), false);
                        regs.set_stall(EndpointAddress::out_ep(DATA_ENDPOINT), false);
                        regs.arm_out(DATA_ENDPOINT);
                        info!("usb configured");
                        Ok(0)
                    }
                    _ => Err(Rejected),
                }
            }
            (Recipient::Device, request::GET_CONFIGURATION, Request::In(buf)) => {
                respond(buf, &[*self.configuration])
            }
            (Recipient::Device | Recipient::Interface, request::GET_STATUS, Request::In(buf)) => {
                respond(buf, &[0, 0])
            }
            (Recipient::Endpoint, request::GET_STATUS, Request::In(buf)) => {
                let address = endpoint_index(setup)?;
                let halted = match self.endpoint(address) {
                    Some(ep) => ep.is_stalled(),
                    None if address.number() == 0 => false,
                    None => return Err(Rejected),
                };
                respond(buf, &[u8::from(halted), 0])
            }
            (
                Recipient::Endpoint,
                request::SET_FEATURE | request::CLEAR_FEATURE,
                Request::NoData,
            ) if setup.value == feature::ENDPOINT_HALT => {
                let address = endpoint_index(setup)?;
                if address.number() == 0 {
                    // Endpoint 0 recovers on the next SETUP
                    return Ok(0);
                }
                let halt = setup.request == request::SET_FEATURE;
                let ep = self.endpoint(address).ok_or(Rejected)?;
                if halt {
                    ep.stall();
                } else {
                    ep.clear_stall();
                }
                regs.set_stall(address, halt);
                if !halt && !address.is_in() {
                    regs.arm_out(address.number());
                }
                Ok(0)
            }
            (_, _, request) => self.handlers.dispatch(setup, request),
        }
    }
}

/// Bulk IN packet loaded into the controller, awaiting the host's ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Data(usize),
    /// Terminator after an exactly filled last packet; carries that
    /// packet's length, credited on this ACK
    ZeroLength(usize),
}

/// USB device with `N`-byte control buffer, descriptors and receive ring
pub struct UsbDevice<R, const N: usize> {
    regs: R,
    enabled: bool,
    state: DeviceState,
    /// State to return to on resume
    resume_state: DeviceState,
    configuration: u8,
    pending_address: Option<u8>,
    control: ControlPipe<N>,
    handlers: HandlerRegistry,
    bulk_in: EndpointState,
    bulk_out: EndpointState,
    rx: Option<TransferDescriptor<N>>,
    tx: Option<TransferDescriptor<N>>,
    in_flight: Option<InFlight>,
    /// The write owes a zero-length packet after its last data packet
    zlp_pending: bool,
    /// Bulk OUT left un-armed until the ring has room for a packet
    out_paused: bool,
    ring: RingBuffer<N>,
    listener: Option<Listener>,
    dropped: u32,
    next_id: u16,
    now: u32,
}

impl<R: UsbRegisters, const N: usize> UsbDevice<R, N> {
    /// Wrap a controller; the device must be configured before use
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            enabled: false,
            state: DeviceState::Default,
            resume_state: DeviceState::Default,
            configuration: 0,
            pending_address: None,
            control: ControlPipe::new(64),
            handlers: HandlerRegistry::new(),
            bulk_in: EndpointState::new(64),
            bulk_out: EndpointState::new(64),
            rx: None,
            tx: None,
            in_flight: None,
            zlp_pending: false,
            out_paused: false,
            ring: RingBuffer::new(),
            listener: None,
            dropped: 0,
            next_id: 0,
            now: 0,
        }
    }

    /// Apply packet sizes, connect and wait for the host's reset
    pub fn configure(&mut self, config: &UsbConfig) -> Result<()> {
        config.validate()?;

        self.regs.set_interrupts(false);
        self.regs.apply_config(config);
        self.control.set_max_packet(config.control_max_packet);
        self.bulk_in.set_max_packet(config.bulk_max_packet);
        self.bulk_out.set_max_packet(config.bulk_max_packet);
        self.reset_bus_state();
        self.ring.clear();
        self.enabled = true;
        self.regs.set_interrupts(true);
        debug!(
            "usb enabled, ep0 {=u16} bytes, bulk {=u16} bytes",
            config.control_max_packet,
            config.bulk_max_packet
        );
        Ok(())
    }

    /// Route class, vendor or unhandled standard requests to `handler`
    pub fn register_request_handler(
        &mut self,
        kind: RequestKind,
        recipient: Recipient,
        request: u8,
        handler: &'static dyn RequestHandler,
    ) -> Result<()> {
        self.handlers.register(kind, recipient, request, handler)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.state == DeviceState::Configured
    }

    /// Halt an endpoint
    ///
    /// Endpoint 0 recovers on the next SETUP, bulk endpoints when the
    /// host clears ENDPOINT_HALT.
    pub fn stall(&mut self, endpoint: EndpointAddress) -> Result<()> {
        if endpoint.number() == 0 {
            self.control.stall(&mut self.regs);
            return Ok(());
        }
        let ep = if endpoint == EndpointAddress::in_ep(DATA_ENDPOINT) {
            &mut self.bulk_in
        } else if endpoint == EndpointAddress::out_ep(DATA_ENDPOINT) {
            &mut self.bulk_out
        } else {
            return Err(Error::NotFound);
        };
        ep.stall();
        self.regs.set_stall(endpoint, true);
        if endpoint.is_in() {
            self.halt_in();
        }
        Ok(())
    }

    /// Start receiving `len` bytes from the bulk OUT endpoint
    ///
    /// Bytes already waiting in the receive ring are taken first.
    pub fn read_async(
        &mut self,
        len: usize,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle> {
        if !self.enabled || !self.is_configured() {
            return Err(Error::NotConfigured);
        }
        if self.rx.as_ref().is_some_and(|d| d.is_active()) {
            return Err(Error::Busy);
        }

        let handle = self.allocate(Direction::Read);
        let mut desc = TransferDescriptor::read(handle, len, self.now, timeout, callback)?;
        desc.apply(TransferEvent::Start);
        if len == 0 {
            desc.apply(TransferEvent::LastUnit);
        }
        while desc.is_active() {
            let Some(byte) = self.ring.pop() else {
                break;
            };
            desc.store(byte);
        }
        if desc.is_terminal() {
            desc.notify();
        }
        debug!("bulk read of {} bytes, {} buffered", len, desc.transferred());

        self.rx = Some(desc);
        self.resume_out();
        Ok(handle)
    }

    /// Start sending `bytes` on the bulk IN endpoint
    pub fn write_async(
        &mut self,
        bytes: &[u8],
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Handle> {
        if !self.enabled || !self.is_configured() {
            return Err(Error::NotConfigured);
        }
        let loaded = self.in_flight.is_some();
        if loaded || self.tx.as_ref().is_some_and(|d| d.is_active()) || self.bulk_in.is_stalled() {
            return Err(Error::Busy);
        }

        let handle = self.allocate(Direction::Write);
        let mut desc = TransferDescriptor::write(handle, bytes, self.now, timeout, callback)?;
        desc.apply(TransferEvent::Start);

        if bytes.is_empty() {
            desc.apply(TransferEvent::LastUnit);
            desc.notify();
            self.tx = Some(desc);
            return Ok(handle);
        }

        self.zlp_pending = bytes.len() % self.bulk_in.max_packet_len() == 0;
        self.tx = Some(desc);
        self.send_bulk();
        debug!("bulk write of {} bytes", bytes.len());
        Ok(handle)
    }

    /// Progress of a bulk transfer
    pub fn status(&self, handle: Handle) -> Result<TransferStatus> {
        self.find(handle).map(|d| d.status())
    }

    /// Cancel a bulk transfer; a finished one keeps its outcome
    ///
    /// A cancelled write's packet stays loaded until the host takes it,
    /// and the endpoint accepts no new write before then.
    pub fn cancel(&mut self, handle: Handle) -> Result<()> {
        self.find(handle)?;
        self.abort(handle.direction, TransferEvent::Cancel);
        Ok(())
    }

    /// Collect a finished bulk transfer and release its slot
    ///
    /// A read's bytes, partial ones included, are copied to `out`.
    pub fn take(&mut self, handle: Handle, out: &mut [u8]) -> Result<usize> {
        let desc = self.find(handle)?;
        if desc.is_active() {
            return Err(Error::Busy);
        }
        if handle.direction == Direction::Read {
            let data = desc.data();
            let dest = out.get_mut(..data.len()).ok_or(Error::TooLong)?;
            dest.copy_from_slice(data);
        }
        let outcome = desc.outcome();
        *self.slot_mut(handle.direction) = None;
        outcome
    }

    /// Pop one received byte
    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = self.ring.pop();
        self.resume_out();
        byte
    }

    /// Drain received bytes into `out`
    pub fn read_buffered(&mut self, out: &mut [u8]) -> usize {
        let count = self.ring.pop_into(out);
        self.resume_out();
        count
    }

    pub fn buffered(&self) -> usize {
        self.ring.available()
    }

    /// Install or remove the receive notification hook
    pub fn set_listener(&mut self, listener: Option<Listener>) {
        self.listener = listener;
    }

    /// Bytes discarded on a halted or mis-toggled endpoint, or by a full ring
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Service the controller's interrupt
    pub fn on_interrupt(&mut self) {
        for _ in 0..MAX_EVENTS_PER_ENTRY {
            let Some(event) = self.regs.poll() else {
                return;
            };
            trace!("usb event {}", event);
            self.handle_event(event);
        }
        warn!("usb interrupt entry hit event bound");
    }

    /// Expire bulk transfers whose timeout elapsed by tick `now`
    pub fn on_tick(&mut self, now: u32) {
        self.now = now;
        for direction in [Direction::Read, Direction::Write] {
            if self.slot(direction).as_ref().is_some_and(|d| d.expired(now)) {
                self.abort(direction, TransferEvent::Expired);
                warn!("bulk {} timed out", direction);
            }
        }
    }

    fn allocate(&mut self, direction: Direction) -> Handle {
        self.next_id = self.next_id.wrapping_add(1);
        Handle {
            direction,
            id: self.next_id,
        }
    }

    fn slot(&self, direction: Direction) -> &Option<TransferDescriptor<N>> {
        match direction {
            Direction::Read => &self.rx,
            Direction::Write => &self.tx,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Option<TransferDescriptor<N>> {
        match direction {
            Direction::Read => &mut self.rx,
            Direction::Write => &mut self.tx,
        }
    }

    fn find(&self, handle: Handle) -> Result<&TransferDescriptor<N>> {
        self.slot(handle.direction)
            .as_ref()
            .filter(|d| d.handle() == handle)
            .ok_or(Error::NotFound)
    }

    /// End an active bulk transfer with `event`
    fn abort(&mut self, direction: Direction, event: TransferEvent) {
        if let Some(desc) = self.slot_mut(direction).as_mut() {
            if desc.is_active() {
                desc.apply(event);
                desc.notify();
            }
        }
        if direction == Direction::Write {
            self.zlp_pending = false;
        }
    }

    /// Bulk IN halted: the loaded packet is discarded with the write
    fn halt_in(&mut self) {
        self.abort(Direction::Write, TransferEvent::Cancel);
        self.in_flight = None;
    }

    /// Bulk endpoints went away (reset or deconfigure)
    fn drop_bulk(&mut self) {
        self.abort(Direction::Read, TransferEvent::Cancel);
        self.halt_in();
    }

    fn reset_bus_state(&mut self) {
        self.drop_bulk();
        self.state = DeviceState::Default;
        self.resume_state = DeviceState::Default;
        self.configuration = 0;
        self.pending_address = None;
        self.out_paused = false;
        self.control.reset();
        self.bulk_in.reset();
        self.bulk_out.reset();
        self.regs.set_address(0);
        self.regs.arm_out(0);
    }

    fn handle_event(&mut self, event: UsbEvent) {
        match event {
            UsbEvent::Reset => {
                info!("usb bus reset");
                self.reset_bus_state();
            }
            UsbEvent::Setup { endpoint: 0 } => {
                let was = self.state;
                let (regs, control, mut standard) = self.split();
                control.on_setup(regs, &mut standard);
                self.after_request(was);
            }
            UsbEvent::Out {
                endpoint: 0,
                toggle,
            } => {
                let was = self.state;
                let (regs, control, mut standard) = self.split();
                let completed = control.on_out(regs, &mut standard, toggle);
                self.after_request(was);
                if let Some(completed) = completed {
                    self.on_control_complete(completed);
                }
            }
            UsbEvent::InComplete { endpoint: 0 } => {
                if let Some(completed) = self.control.on_in_complete(&mut self.regs) {
                    self.on_control_complete(completed);
                }
            }
            UsbEvent::Out {
                endpoint: DATA_ENDPOINT,
                toggle,
            } => self.on_bulk_out(toggle),
            UsbEvent::InComplete {
                endpoint: DATA_ENDPOINT,
            } => self.on_bulk_in_complete(),
            UsbEvent::Suspend => {
                if self.state != DeviceState::Suspended {
                    self.resume_state = self.state;
                    self.state = DeviceState::Suspended;
                    debug!("usb suspended");
                }
            }
            UsbEvent::Resume => {
                if self.state == DeviceState::Suspended {
                    self.state = self.resume_state;
                    debug!("usb resumed");
                }
            }
            other => warn!("event on unused endpoint: {}", other),
        }
    }

    fn split(&mut self) -> (&mut R, &mut ControlPipe<N>, Standard<'_>) {
        (
            &mut self.regs,
            &mut self.control,
            Standard {
                state: &mut self.state,
                configuration: &mut self.configuration,
                pending_address: &mut self.pending_address,
                bulk_in: &mut self.bulk_in,
                bulk_out: &mut self.bulk_out,
                handlers: &self.handlers,
            },
        )
    }

    /// Side effects of a request on the bulk transfers
    fn after_request(&mut self, was: DeviceState) {
        if was == DeviceState::Configured && self.state != DeviceState::Configured {
            self.drop_bulk();
        }
        if self.bulk_in.is_stalled() {
            self.halt_in();
        }
        if was != DeviceState::Configured && self.is_configured() {
            // Fresh configuration armed bulk OUT with empty endpoints
            self.out_paused = false;
            self.in_flight = None;
        }
    }

    fn on_control_complete(&mut self, Completed(setup): Completed) {
        if setup.is_standard(Recipient::Device, request::SET_ADDRESS) {
            if let Some(address) = self.pending_address.take() {
                self.regs.set_address(address);
                self.state = if address == 0 {
                    DeviceState::Default
                } else {
                    DeviceState::Addressed
                };
                info!("usb address {=u8}", address);
            }
        }
    }

    fn send_bulk(&mut self) {
        let Some(desc) = self.tx.as_ref() else {
            return;
        };
        let pending = desc.pending();
        let len = pending.len().min(self.bulk_in.max_packet_len());
        self.regs
            .write_packet(DATA_ENDPOINT, &pending[..len], self.bulk_in.toggle());
        self.in_flight = Some(InFlight::Data(len));
    }

    fn on_bulk_in_complete(&mut self) {
        let Some(packet) = self.in_flight.take() else {
            warn!("bulk IN ACK with no packet loaded");
            return;
        };
        self.bulk_in.advance();
        let Some(desc) = self.tx.as_mut() else {
            return;
        };
        // Late ACK for a cancelled or timed-out transfer
        if !desc.is_active() {
            return;
        }

        let acked = match packet {
            InFlight::Data(len) if self.zlp_pending && len == desc.pending().len() => {
                // Last data packet counts once the terminator is ACKed
                self.zlp_pending = false;
                self.regs
                    .write_packet(DATA_ENDPOINT, &[], self.bulk_in.toggle());
                self.in_flight = Some(InFlight::ZeroLength(len));
                return;
            }
            InFlight::Data(len) | InFlight::ZeroLength(len) => len,
        };
        if desc.consume(acked) == TransferState::Complete {
            desc.notify();
            debug!("bulk write complete");
        } else {
            self.send_bulk();
        }
    }

    fn on_bulk_out(&mut self, toggle: Toggle) {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let len = self
            .regs
            .read_packet(DATA_ENDPOINT, &mut packet)
            .min(MAX_PACKET_SIZE);

        if !self.is_configured() || self.bulk_out.is_stalled() {
            self.dropped = self.dropped.saturating_add(len as u32);
            return;
        }
        if !self.bulk_out.matches(toggle) {
            warn!("bulk data toggle mismatch");
            self.bulk_out.stall();
            self.regs
                .set_stall(EndpointAddress::out_ep(DATA_ENDPOINT), true);
            self.dropped = self.dropped.saturating_add(len as u32);
            self.abort(Direction::Read, TransferEvent::Fault(Fault::DataToggle));
            return;
        }
        self.bulk_out.advance();

        let mut bytes = packet[..len].iter().copied();
        if let Some(desc) = self.rx.as_mut().filter(|d| d.is_active()) {
            for byte in bytes.by_ref() {
                if desc.store(byte) == TransferState::Complete {
                    desc.notify();
                    debug!("bulk read complete");
                    break;
                }
            }
        }
        for byte in bytes {
            if self.ring.push(byte).is_err() {
                self.dropped = self.dropped.saturating_add(1);
                continue;
            }
            if let Some(listener) = self.listener {
                listener(Notice::Received(byte));
            }
        }

        if self.ring.free_space() >= self.bulk_out.max_packet_len() {
            self.regs.arm_out(DATA_ENDPOINT);
        } else {
            self.out_paused = true;
            debug!("receive ring full, pausing bulk OUT");
        }
    }

    fn resume_out(&mut self) {
        if self.out_paused
            && self.is_configured()
            && !self.bulk_out.is_stalled()
            && self.ring.free_space() >= self.bulk_out.max_packet_len()
        {
            self.out_paused = false;
            self.regs.arm_out(DATA_ENDPOINT);
        }
    }
}

impl<R: UsbRegisters, const N: usize> PeripheralDriver for UsbDevice<R, N> {
    fn on_interrupt(&mut self) {
        UsbDevice::on_interrupt(self)
    }

    fn on_tick(&mut self, now: u32) {
        UsbDevice::on_tick(self, now)
    }

    fn status(&self, handle: Handle) -> Result<TransferStatus> {
        UsbDevice::status(self, handle)
    }

    fn cancel(&mut self, handle: Handle) -> Result<()> {
        UsbDevice::cancel(self, handle)
    }
}

/// Send `bytes` on the bulk IN endpoint, waiting at most `timeout` ticks
pub fn write_blocking<R, L, T, I, const N: usize>(
    shared: &Shared<UsbDevice<R, N>, L>,
    bytes: &[u8],
    timeout: u32,
    time: &T,
    idle: &mut I,
) -> Result<usize>
where
    R: UsbRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    let handle = shared.lock(|d| {
        d.on_tick(time.current_tick());
        d.write_async(bytes, Some(timeout), None)
    })?;
    shared.wait_blocking(handle, time, idle)?;
    shared.lock(|d| d.take(handle, &mut []))
}

/// Receive `buf.len()` bytes from the bulk OUT endpoint, waiting at most
/// `timeout` ticks
///
/// On error the bytes received before it are left at the start of `buf`.
pub fn read_blocking<R, L, T, I, const N: usize>(
    shared: &Shared<UsbDevice<R, N>, L>,
    buf: &mut [u8],
    timeout: u32,
    time: &T,
    idle: &mut I,
) -> Result<usize>
where
    R: UsbRegisters,
    L: InterruptLine,
    T: TimeBase,
    I: Idle,
{
    let handle = shared.lock(|d| {
        d.on_tick(time.current_tick());
        d.read_async(buf.len(), Some(timeout), None)
    })?;
    shared.wait_blocking(handle, time, idle)?;
    shared.lock(|d| d.take(handle, buf))
}
