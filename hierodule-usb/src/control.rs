//! Endpoint 0 control transfers
//!
//! A control transfer runs `Idle → Setup → (DataIn | DataOut)? → Status →
//! Idle`. The SETUP packet is resolved synchronously: requests without a
//! data stage and IN requests are answered before the SETUP interrupt
//! returns, OUT requests once their data stage has arrived. Anything that
//! cannot be resolved stalls both directions of endpoint 0 until the next
//! SETUP.
//!
//! IN responses are truncated to `wLength` and sent in packets of the
//! endpoint's max packet size; a response shorter than `wLength` that
//! fills its last packet exactly ends with a zero-length packet. The host
//! may end an IN data stage early with its zero-length status OUT, which
//! completes the request. OUT data ends at `wLength` bytes or at the
//! first short packet.

use heapless::Vec;
use hierodule_core::{Direction, Error, Fault, Handle, TransferDescriptor, TransferEvent, TransferState};
use hierodule_hal::usb::{EndpointAddress, Toggle, UsbRegisters};

use crate::endpoint::{EndpointState, Stage, MAX_PACKET_SIZE};
use crate::setup::{DataDirection, Recipient, RequestKind, SetupPacket};

/// Room for registered request handlers
pub const MAX_HANDLERS: usize = 8;

/// A request was refused; the control pipe stalls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rejected;

/// Data stage of a request as seen by its handler
#[derive(Debug)]
pub enum Request<'a> {
    /// No data stage
    NoData,
    /// Device to host: fill the buffer and return the response length
    In(&'a mut [u8]),
    /// Host to device: the received data stage
    Out(&'a [u8]),
}

/// Application handler for class, vendor or unhandled standard requests
pub trait RequestHandler: Sync {
    /// Answer `setup`; the returned length only matters for `Request::In`
    fn handle(&self, setup: &SetupPacket, request: Request<'_>) -> Result<usize, Rejected>;
}

/// Resolves a SETUP packet on behalf of the pipe
pub trait Requests<R> {
    fn resolve(
        &mut self,
        regs: &mut R,
        setup: &SetupPacket,
        request: Request<'_>,
    ) -> Result<usize, Rejected>;
}

struct Entry {
    kind: RequestKind,
    recipient: Recipient,
    request: u8,
    handler: &'static dyn RequestHandler,
}

/// Request handlers keyed by (kind, recipient, request code)
pub struct HandlerRegistry {
    entries: Vec<Entry, MAX_HANDLERS>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Route matching requests to `handler`
    ///
    /// A key can only be registered once.
    pub fn register(
        &mut self,
        kind: RequestKind,
        recipient: Recipient,
        request: u8,
        handler: &'static dyn RequestHandler,
    ) -> hierodule_core::Result<()> {
        if self.find(kind, recipient, request).is_some() {
            return Err(Error::Occupied);
        }
        self.entries
            .push(Entry {
                kind,
                recipient,
                request,
                handler,
            })
            .map_err(|_| Error::TooLong)
    }

    pub fn find(
        &self,
        kind: RequestKind,
        recipient: Recipient,
        request: u8,
    ) -> Option<&'static dyn RequestHandler> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.recipient == recipient && e.request == request)
            .map(|e| e.handler)
    }

    /// Hand `setup` to its registered handler
    pub fn dispatch(&self, setup: &SetupPacket, request: Request<'_>) -> Result<usize, Rejected> {
        let handler = self
            .find(setup.kind(), setup.recipient(), setup.request)
            .ok_or(Rejected)?;
        handler.handle(setup, request)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A control transfer passed its status stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completed(pub SetupPacket);

/// Endpoint 0 stage machine with an `N`-byte data stage buffer
pub struct ControlPipe<const N: usize> {
    endpoint: EndpointState,
    setup: Option<SetupPacket>,
    data: Option<TransferDescriptor<N>>,
    /// Length of the IN packet awaiting the host's ACK
    in_flight: usize,
    /// A short response filling its last packet owes a zero-length packet
    zlp_pending: bool,
    next_id: u16,
}

impl<const N: usize> ControlPipe<N> {
    pub const fn new(max_packet: u16) -> Self {
        Self {
            endpoint: EndpointState::new(max_packet),
            setup: None,
            data: None,
            in_flight: 0,
            zlp_pending: false,
            next_id: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.endpoint.stage()
    }

    pub fn endpoint(&self) -> &EndpointState {
        &self.endpoint
    }

    pub fn is_stalled(&self) -> bool {
        self.endpoint.is_stalled()
    }

    /// The request being served
    pub fn setup(&self) -> Option<&SetupPacket> {
        self.setup.as_ref()
    }

    pub fn set_max_packet(&mut self, max_packet: u16) {
        self.endpoint.set_max_packet(max_packet);
    }

    /// Drop any transfer in progress (bus reset)
    pub fn reset(&mut self) {
        self.endpoint.reset();
        self.clear_transfer();
    }

    /// Stall both directions until the next SETUP
    pub fn stall<R: UsbRegisters>(&mut self, regs: &mut R) {
        if let Some(desc) = self.data.as_mut() {
            if desc.is_active() {
                desc.apply(TransferEvent::Fault(Fault::DataToggle));
            }
        }
        self.clear_transfer();
        self.endpoint.stall();
        regs.set_stall(EndpointAddress::CONTROL_IN, true);
        regs.set_stall(EndpointAddress::CONTROL_OUT, true);
    }

    fn clear_transfer(&mut self) {
        self.setup = None;
        self.data = None;
        self.in_flight = 0;
        self.zlp_pending = false;
    }

    fn allocate(&mut self, direction: Direction) -> Handle {
        self.next_id = self.next_id.wrapping_add(1);
        Handle {
            direction,
            id: self.next_id,
        }
    }

    /// A SETUP packet arrived; any transfer in progress is abandoned
    pub fn on_setup<R, Q>(&mut self, regs: &mut R, requests: &mut Q)
    where
        R: UsbRegisters,
        Q: Requests<R>,
    {
        let bytes = regs.read_setup(0);

        if self.endpoint.is_stalled() {
            self.endpoint.clear_stall();
            regs.set_stall(EndpointAddress::CONTROL_IN, false);
            regs.set_stall(EndpointAddress::CONTROL_OUT, false);
        }
        if self.endpoint.stage() != Stage::Idle {
            debug!("setup abandons {} stage", self.endpoint.stage());
        }
        self.clear_transfer();
        self.endpoint.set_stage(Stage::Setup);
        // Data and status stages begin with DATA1
        self.endpoint.set_toggle(Toggle::Data1);

        let setup = match SetupPacket::parse(&bytes) {
            Ok(setup) => setup,
            Err(err) => {
                warn!("malformed setup: {}", err);
                self.stall(regs);
                return;
            }
        };
        trace!("setup {}", setup);
        self.setup = Some(setup);

        if !setup.has_data_stage() {
            match requests.resolve(regs, &setup, Request::NoData) {
                Ok(_) => self.send_status(regs),
                Err(Rejected) => self.reject(regs, &setup),
            }
            return;
        }

        let requested = usize::from(setup.length);
        match setup.direction() {
            DataDirection::In => {
                let mut response = [0u8; N];
                let len = match requests.resolve(regs, &setup, Request::In(&mut response)) {
                    Ok(len) => len.min(N).min(requested),
                    Err(Rejected) => return self.reject(regs, &setup),
                };
                let handle = self.allocate(Direction::Write);
                let Ok(mut desc) = TransferDescriptor::write(handle, &response[..len], 0, None, None)
                else {
                    return self.stall(regs);
                };
                desc.apply(TransferEvent::Start);
                self.data = Some(desc);
                // An empty response is itself the terminating packet
                self.zlp_pending =
                    len > 0 && len < requested && len % self.endpoint.max_packet_len() == 0;
                self.endpoint.set_stage(Stage::DataIn);
                self.send_in(regs);
                // The host may cut the data stage short with its status OUT
                regs.arm_out(0);
            }
            DataDirection::Out => {
                let handle = self.allocate(Direction::Read);
                match TransferDescriptor::read(handle, requested, 0, None, None) {
                    Ok(mut desc) => {
                        desc.apply(TransferEvent::Start);
                        self.data = Some(desc);
                        self.endpoint.set_stage(Stage::DataOut);
                        regs.arm_out(0);
                    }
                    Err(_) => {
                        warn!("data stage of {} bytes exceeds buffer", requested);
                        self.stall(regs);
                    }
                }
            }
        }
    }

    /// The host acknowledged an IN packet on endpoint 0
    pub fn on_in_complete<R: UsbRegisters>(&mut self, regs: &mut R) -> Option<Completed> {
        match self.endpoint.stage() {
            Stage::DataIn => {
                self.endpoint.advance();
                let sent = core::mem::take(&mut self.in_flight);
                let desc = self.data.as_mut()?;
                desc.consume(sent);

                if !desc.pending().is_empty() {
                    self.send_in(regs);
                } else if self.zlp_pending {
                    self.zlp_pending = false;
                    regs.write_packet(0, &[], self.endpoint.toggle());
                } else {
                    // Host finishes with a zero-length OUT, already armed
                    self.endpoint.set_stage(Stage::Status);
                    self.endpoint.set_toggle(Toggle::Data1);
                }
                None
            }
            Stage::Status if self.status_is_in() => self.finish(),
            _ => None,
        }
    }

    /// An OUT packet arrived on endpoint 0
    pub fn on_out<R, Q>(&mut self, regs: &mut R, requests: &mut Q, toggle: Toggle) -> Option<Completed>
    where
        R: UsbRegisters,
        Q: Requests<R>,
    {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let len = regs.read_packet(0, &mut packet).min(MAX_PACKET_SIZE);

        match self.endpoint.stage() {
            Stage::DataOut => {
                if !self.endpoint.matches(toggle) {
                    warn!("control data toggle mismatch");
                    self.stall(regs);
                    return None;
                }
                self.endpoint.advance();

                let setup = self.setup?;
                let desc = self.data.as_mut()?;
                for &byte in &packet[..len] {
                    desc.store(byte);
                }
                let short = len < self.endpoint.max_packet_len();
                if desc.state() != TransferState::Complete && !short {
                    regs.arm_out(0);
                    return None;
                }

                match requests.resolve(regs, &setup, Request::Out(desc.data())) {
                    Ok(_) => self.send_status(regs),
                    Err(Rejected) => self.reject(regs, &setup),
                }
                None
            }
            Stage::DataIn if len == 0 => {
                if toggle != Toggle::Data1 {
                    warn!("status stage toggle mismatch");
                    self.stall(regs);
                    return None;
                }
                debug!("host ended data stage early");
                self.finish()
            }
            Stage::Status if !self.status_is_in() => {
                if !self.endpoint.matches(toggle) {
                    warn!("status stage toggle mismatch");
                    self.stall(regs);
                    return None;
                }
                self.finish()
            }
            stage => {
                warn!("unexpected OUT in {} stage", stage);
                self.stall(regs);
                None
            }
        }
    }

    fn send_in<R: UsbRegisters>(&mut self, regs: &mut R) {
        let Some(desc) = self.data.as_ref() else {
            return;
        };
        let pending = desc.pending();
        let len = pending.len().min(self.endpoint.max_packet_len());
        regs.write_packet(0, &pending[..len], self.endpoint.toggle());
        self.in_flight = len;
    }

    /// Zero-length IN handshake after a no-data or OUT request
    fn send_status<R: UsbRegisters>(&mut self, regs: &mut R) {
        self.endpoint.set_stage(Stage::Status);
        self.endpoint.set_toggle(Toggle::Data1);
        regs.write_packet(0, &[], Toggle::Data1);
    }

    /// Whether the status stage runs device to host
    fn status_is_in(&self) -> bool {
        self.setup
            .map_or(true, |s| !(s.has_data_stage() && s.direction() == DataDirection::In))
    }

    fn reject<R: UsbRegisters>(&mut self, regs: &mut R, setup: &SetupPacket) {
        debug!(
            "unsupported request {=u8:#x} ({}, {})",
            setup.request,
            setup.kind(),
            setup.recipient()
        );
        self.stall(regs);
    }

    fn finish(&mut self) -> Option<Completed> {
        let setup = self.setup.take();
        self.clear_transfer();
        self.endpoint.set_stage(Stage::Idle);
        setup.map(Completed)
    }
}
