//! Peripheral-scoped ownership cell
//!
//! A driver is shared between the application and its interrupt handler.
//! [`Shared`] is the only path to it: application code goes through
//! [`Shared::lock`], which masks just that peripheral's interrupt line
//! while the closure runs, and the handler goes through
//! [`Shared::on_interrupt`], which never blocks.
//!
//! Waiting for a transfer to finish comes in two flavours:
//! - [`Shared::wait_blocking`] interleaves a status check with a
//!   low-power wait, letting the timer and peripheral interrupts wake it
//! - [`Shared::wait`] is a future woken from the interrupt handler

use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;
use hierodule_hal::{Idle, InterruptLine, TimeBase};
use spin::Mutex;

use crate::dispatch::InterruptHandler;
use crate::engine::{BusProtocol, Driver};
use crate::error::Result;
use crate::transfer::{Handle, TransferStatus};
use crate::PeripheralDriver;

/// A driver plus the interrupt line that guards it
pub struct Shared<D, L> {
    driver: Mutex<D>,
    line: L,
    waker: AtomicWaker,
}

impl<D, L: InterruptLine> Shared<D, L> {
    pub const fn new(driver: D, line: L) -> Self {
        Self {
            driver: Mutex::new(driver),
            line,
            waker: AtomicWaker::new(),
        }
    }

    /// Run `f` with the driver, masking the peripheral's interrupt
    ///
    /// The line's previous mask state is restored afterwards, so nested
    /// sections on other peripherals compose. Must not be called from the
    /// peripheral's own interrupt handler.
    pub fn lock<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let was_masked = self.line.is_masked();
        self.line.mask();
        let result = {
            let mut driver = self.driver.lock();
            f(&mut driver)
        };
        if !was_masked {
            self.line.unmask();
        }
        result
    }

    pub fn line(&self) -> &L {
        &self.line
    }
}

impl<D: PeripheralDriver, L: InterruptLine> Shared<D, L> {
    /// Interrupt entry for the peripheral
    pub fn on_interrupt(&self) {
        match self.driver.try_lock() {
            Some(mut driver) => driver.on_interrupt(),
            None => warn!("driver busy at interrupt entry"),
        }
        self.waker.wake();
    }

    /// Timer tick for timeout bookkeeping
    ///
    /// A tick that lands while the application holds the driver is
    /// skipped; timeouts compare against the tick, so the next one
    /// expires anything this one would have.
    pub fn on_tick(&self, now: u32) {
        match self.driver.try_lock() {
            Some(mut driver) => driver.on_tick(now),
            None => trace!("driver busy at tick {=u32}, deferred", now),
        }
        self.waker.wake();
    }

    /// Block until the transfer reaches a terminal state
    ///
    /// Each pass refreshes the driver's tick so a transfer's own timeout
    /// is honored even without a periodic timer callback.
    pub fn wait_blocking<T, I>(&self, handle: Handle, time: &T, idle: &mut I) -> Result<TransferStatus>
    where
        T: TimeBase,
        I: Idle,
    {
        loop {
            let now = time.current_tick();
            let status = self.lock(|d| {
                d.on_tick(now);
                d.status(handle)
            })?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            idle.wait_for_interrupt();
        }
    }

    /// Wait asynchronously until the transfer reaches a terminal state
    pub async fn wait(&self, handle: Handle) -> Result<TransferStatus> {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            match self.lock(|d| d.status(handle)) {
                Ok(status) if !status.state.is_terminal() => Poll::Pending,
                result => Poll::Ready(result),
            }
        })
        .await
    }
}

/// Blocking transfers on a bus driver
impl<P, const N: usize, L> Shared<Driver<P, N>, L>
where
    P: BusProtocol,
    L: InterruptLine,
{
    /// Read `buf.len()` units, waiting at most `timeout` ticks
    ///
    /// Returns the unit count, or the error that ended the read. On error
    /// the units received before it are left at the start of `buf`.
    pub fn read<T: TimeBase, I: Idle>(
        &self,
        buf: &mut [u8],
        timeout: u32,
        time: &T,
        idle: &mut I,
    ) -> Result<usize> {
        let handle = self.lock(|d| {
            d.on_tick(time.current_tick());
            d.read_async(buf.len(), Some(timeout), None)
        })?;
        self.wait_blocking(handle, time, idle)?;
        self.lock(|d| d.take(handle, buf))
    }

    /// Write all of `bytes`, waiting at most `timeout` ticks
    pub fn write<T: TimeBase, I: Idle>(
        &self,
        bytes: &[u8],
        timeout: u32,
        time: &T,
        idle: &mut I,
    ) -> Result<usize> {
        let handle = self.lock(|d| {
            d.on_tick(time.current_tick());
            d.write_async(bytes, Some(timeout), None)
        })?;
        self.wait_blocking(handle, time, idle)?;
        self.lock(|d| d.take(handle, &mut []))
    }
}

impl<D, L> InterruptHandler for Shared<D, L>
where
    D: PeripheralDriver + Send,
    L: InterruptLine + Sync,
{
    fn on_interrupt(&self) {
        Shared::on_interrupt(self)
    }

    fn on_tick(&self, now: u32) {
        Shared::on_tick(self, now)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::tests::Scripted;
    use crate::engine::BusEvent;
    use crate::error::Error;
    use crate::state::TransferState;
    use core::cell::Cell;
    use core::sync::atomic::{AtomicBool, Ordering};
    use hierodule_hal::TickListener;

    #[derive(Default)]
    pub(crate) struct TestLine {
        masked: AtomicBool,
    }

    impl InterruptLine for TestLine {
        fn mask(&self) {
            self.masked.store(true, Ordering::SeqCst);
        }

        fn unmask(&self) {
            self.masked.store(false, Ordering::SeqCst);
        }

        fn is_masked(&self) -> bool {
            self.masked.load(Ordering::SeqCst)
        }
    }

    /// Clock advanced by the test
    #[derive(Default)]
    pub(crate) struct TestClock {
        pub now: Cell<u32>,
    }

    impl TimeBase for TestClock {
        fn current_tick(&self) -> u32 {
            self.now.get()
        }

        fn register_periodic_callback(&mut self, _interval: u32, _listener: &'static dyn TickListener) {}
    }

    /// Idle that runs a closure in place of sleeping
    pub(crate) struct Simulated<F: FnMut()>(pub F);

    impl<F: FnMut()> Idle for Simulated<F> {
        fn wait_for_interrupt(&mut self) {
            (self.0)()
        }
    }

    type TestShared = Shared<Driver<Scripted, 8>, TestLine>;

    fn shared() -> TestShared {
        let shared = Shared::new(Driver::new(Scripted::default()), TestLine::default());
        shared.lock(|d| d.configure(&())).unwrap();
        shared
    }

    #[test]
    fn test_lock_masks_and_restores() {
        let shared = shared();
        shared.lock(|_| assert!(shared.line().is_masked()));
        assert!(!shared.line().is_masked());

        shared.line().mask();
        shared.lock(|_| {});
        assert!(shared.line().is_masked());
    }

    #[test]
    fn test_blocking_write_completes() {
        let shared = shared();
        let clock = TestClock::default();
        let mut idle = Simulated(|| {
            shared.lock(|d| d.protocol_mut().feed(&[BusEvent::TxReady]));
            shared.on_interrupt();
        });

        assert_eq!(shared.write(&[1, 2, 3], 100, &clock, &mut idle), Ok(3));
        shared.lock(|d| assert_eq!(d.protocol().written.as_slice(), &[1, 2, 3]));
    }

    #[test]
    fn test_blocking_read_times_out() {
        let shared = shared();
        let clock = TestClock::default();
        let mut idle = Simulated(|| clock.now.set(clock.now.get() + 10));

        let mut buf = [0u8; 4];
        assert_eq!(
            shared.read(&mut buf, 50, &clock, &mut idle),
            Err(Error::Timeout { transferred: 0 })
        );
        assert!(clock.now.get() >= 50);
    }

    #[test]
    fn test_blocking_read_busy() {
        let shared = shared();
        let clock = TestClock::default();
        shared.lock(|d| d.read_async(2, None, None)).unwrap();

        let mut buf = [0u8; 2];
        let mut idle = Simulated(|| {});
        assert_eq!(shared.read(&mut buf, 10, &clock, &mut idle), Err(Error::Busy));
    }

    #[test]
    fn test_tick_while_locked_caught_up() {
        let shared = shared();
        let handle = shared.lock(|d| d.read_async(2, Some(50), None)).unwrap();

        // Timer fires while the application holds the driver
        shared.lock(|_| shared.on_tick(60));
        assert!(shared.lock(|d| d.status(handle)).unwrap().state.is_active());

        shared.on_tick(61);
        assert_eq!(
            shared.lock(|d| d.status(handle)).unwrap().state,
            TransferState::TimedOut
        );
    }

    #[test]
    fn test_async_wait() {
        let shared = shared();
        let handle = shared.lock(|d| d.read_async(2, None, None)).unwrap();

        let feeder = async {
            embassy_futures::yield_now().await;
            shared.lock(|d| {
                d.protocol_mut()
                    .feed(&[BusEvent::RxReady(0x11), BusEvent::RxReady(0x22)])
            });
            shared.on_interrupt();
        };

        let (status, ()) = embassy_futures::block_on(embassy_futures::join::join(
            shared.wait(handle),
            feeder,
        ));

        let status = status.unwrap();
        assert_eq!(status.state, TransferState::Complete);
        assert_eq!(status.transferred, 2);
    }

    #[test]
    fn test_async_wait_unknown_handle() {
        let shared = shared();
        let handle = shared.lock(|d| d.write_async(&[], None, None)).unwrap();
        assert_eq!(shared.lock(|d| d.take(handle, &mut [])), Ok(0));

        let result = embassy_futures::block_on(shared.wait(handle));
        assert_eq!(result, Err(Error::NotFound));
    }
}
