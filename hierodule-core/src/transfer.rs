//! Transfer descriptors
//!
//! A descriptor is the per-operation record of one in-flight read or
//! write: its data, progress, deadline and completion callback. It owns
//! its data so interrupt context never touches caller memory.

use heapless::Vec;
use hierodule_hal::time::elapsed;

use crate::error::{Error, Result};
use crate::state::{Phase, TransferEvent, TransferState};

/// Transfer direction, from the application's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Peripheral to application
    Read,
    /// Application to peripheral
    Write,
}

impl Direction {
    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        }
    }
}

/// Names one started transfer
///
/// Ids come from a per-driver generation counter, so a handle to a
/// collected or replaced transfer no longer matches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle {
    pub direction: Direction,
    pub id: u16,
}

/// Snapshot of a transfer's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferStatus {
    pub state: TransferState,
    pub transferred: usize,
    pub requested: usize,
}

/// Completion callback, invoked once when a transfer reaches a terminal
/// state (from interrupt context unless the application caused it)
pub type Callback = fn(Handle, TransferStatus);

/// One read or write in flight
#[derive(Debug, Clone)]
pub struct TransferDescriptor<const N: usize> {
    handle: Handle,
    state: TransferState,
    /// Received bytes (read) or bytes to send (write)
    data: Vec<u8, N>,
    requested: usize,
    transferred: usize,
    started_at: u32,
    timeout: Option<u32>,
    callback: Option<Callback>,
}

impl<const N: usize> TransferDescriptor<N> {
    /// Describe a read of `len` units
    pub fn read(
        handle: Handle,
        len: usize,
        now: u32,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Self> {
        if len > N {
            return Err(Error::TooLong);
        }
        Ok(Self::new(handle, Vec::new(), len, now, timeout, callback))
    }

    /// Describe a write of `bytes`, copying them in
    pub fn write(
        handle: Handle,
        bytes: &[u8],
        now: u32,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Result<Self> {
        let data = Vec::from_slice(bytes).map_err(|_| Error::TooLong)?;
        Ok(Self::new(handle, data, bytes.len(), now, timeout, callback))
    }

    fn new(
        handle: Handle,
        data: Vec<u8, N>,
        requested: usize,
        now: u32,
        timeout: Option<u32>,
        callback: Option<Callback>,
    ) -> Self {
        Self {
            handle,
            state: TransferState::Idle,
            data,
            requested,
            transferred: 0,
            started_at: now,
            timeout,
            callback,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn transferred(&self) -> usize {
        self.transferred
    }

    /// Units still to move
    pub fn remaining(&self) -> usize {
        self.requested - self.transferred
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn status(&self) -> TransferStatus {
        TransferStatus {
            state: self.state,
            transferred: self.transferred,
            requested: self.requested,
        }
    }

    /// Apply an event, returning the new state
    pub fn apply(&mut self, event: TransferEvent) -> TransferState {
        self.state = self.state.transition(event);
        self.state
    }

    /// Whether a unit may move now
    ///
    /// Units belong to the data phase; during addressing nothing counts.
    fn accepts_units(&self) -> bool {
        matches!(
            self.state,
            TransferState::Armed | TransferState::InProgress(Phase::Data)
        )
    }

    /// Store one received unit and advance
    ///
    /// Returns the new state; `Complete` once the last unit is stored.
    /// Units arriving outside the data phase or after completion are not
    /// stored.
    pub fn store(&mut self, byte: u8) -> TransferState {
        if !self.accepts_units() || self.transferred >= self.requested {
            return self.state;
        }
        // Capacity checked against N at creation
        let _ = self.data.push(byte);
        self.transferred += 1;
        self.advance()
    }

    /// Take the next unit to send and advance
    pub fn next_unit(&mut self) -> Option<u8> {
        if !self.accepts_units() {
            return None;
        }
        let byte = *self.data.get(self.transferred)?;
        self.transferred += 1;
        self.advance();
        Some(byte)
    }

    /// Queued units not yet sent
    pub fn pending(&self) -> &[u8] {
        self.data.get(self.transferred..).unwrap_or(&[])
    }

    /// Mark up to `count` queued units as sent, for packet-based buses
    /// that confirm a whole packet at once
    pub fn consume(&mut self, count: usize) -> TransferState {
        for _ in 0..count {
            if self.next_unit().is_none() {
                break;
            }
        }
        self.state
    }

    fn advance(&mut self) -> TransferState {
        let event = if self.transferred == self.requested {
            TransferEvent::LastUnit
        } else {
            TransferEvent::Unit
        };
        self.apply(event)
    }

    /// Check whether the timeout has elapsed at tick `now`
    pub fn expired(&self, now: u32) -> bool {
        match self.timeout {
            Some(timeout) => self.is_active() && elapsed(self.started_at, now) >= timeout,
            None => false,
        }
    }

    /// Invoke the completion callback with the current status
    pub fn notify(&self) {
        if let Some(callback) = self.callback {
            callback(self.handle, self.status());
        }
    }

    /// Bytes received so far (read) or queued to send (write)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Map the terminal state to the caller-facing result
    pub fn outcome(&self) -> Result<usize> {
        let transferred = self.transferred;
        match self.state {
            TransferState::Complete => Ok(transferred),
            TransferState::Error(fault) => Err(Error::HardwareFault { fault, transferred }),
            TransferState::TimedOut => Err(Error::Timeout { transferred }),
            TransferState::Cancelled => Err(Error::Cancelled { transferred }),
            TransferState::Idle | TransferState::Armed | TransferState::InProgress(_) => {
                Err(Error::Busy)
            }
        }
    }
}
