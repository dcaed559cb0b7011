//! Peripheral dispatch table
//!
//! Maps each hardware interrupt vector to the driver instance that owns
//! it. Chip vector stubs call [`DispatchTable::dispatch`]; the owning
//! handler then reads and clears the hardware flags, decodes the event,
//! and advances its state machine.

use portable_atomic::{AtomicU32, Ordering};
use spin::Once;

use hierodule_hal::TickListener;

use crate::error::{Error, Result};

/// Interrupt vectors served by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Vector {
    Usart1,
    Usart2,
    Usart3,
    Usart6,
    Spi1,
    Spi2,
    Spi3,
    I2c1Event,
    I2c1Error,
    I2c2Event,
    I2c2Error,
    I2c3Event,
    I2c3Error,
    /// USB low-priority (non-isochronous) interrupt
    UsbLowPriority,
}

impl Vector {
    /// Number of vectors in the table
    pub const COUNT: usize = 14;

    /// Every vector, in table order
    pub const ALL: [Vector; Self::COUNT] = [
        Vector::Usart1,
        Vector::Usart2,
        Vector::Usart3,
        Vector::Usart6,
        Vector::Spi1,
        Vector::Spi2,
        Vector::Spi3,
        Vector::I2c1Event,
        Vector::I2c1Error,
        Vector::I2c2Event,
        Vector::I2c2Error,
        Vector::I2c3Event,
        Vector::I2c3Error,
        Vector::UsbLowPriority,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Interrupt-side entry points of a driver instance
pub trait InterruptHandler: Sync {
    /// Service the hardware condition behind the interrupt
    ///
    /// Runs in interrupt context: bounded time, no blocking waits.
    fn on_interrupt(&self);

    /// Periodic timer notification
    fn on_tick(&self, now: u32);
}

type Slot = Once<&'static dyn InterruptHandler>;

/// Vector-to-handler table, populated once at driver initialization
pub struct DispatchTable {
    slots: [Slot; Vector::COUNT],
    spurious: AtomicU32,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    const EMPTY: Slot = Once::new();

    pub const fn new() -> Self {
        Self {
            slots: [Self::EMPTY; Vector::COUNT],
            spurious: AtomicU32::new(0),
        }
    }

    /// Bind `vector` to `handler`
    ///
    /// A vector has exactly one owner; binding it again fails with
    /// `Occupied` and keeps the first handler.
    pub fn register(&self, vector: Vector, handler: &'static dyn InterruptHandler) -> Result<()> {
        let mut installed = false;
        self.slots[vector.index()].call_once(|| {
            installed = true;
            handler
        });

        if installed {
            debug!("vector {} registered", vector);
            Ok(())
        } else {
            Err(Error::Occupied)
        }
    }

    /// Check if a handler is bound to `vector`
    pub fn is_registered(&self, vector: Vector) -> bool {
        self.slots[vector.index()].get().is_some()
    }

    /// Route an interrupt to its owner
    ///
    /// Interrupts on unbound vectors are counted and otherwise ignored.
    pub fn dispatch(&self, vector: Vector) {
        match self.slots[vector.index()].get() {
            Some(handler) => handler.on_interrupt(),
            None => {
                self.spurious.fetch_add(1, Ordering::Relaxed);
                warn!("spurious interrupt on {}", vector);
            }
        }
    }

    /// Fan a timer tick out to every bound handler
    ///
    /// A handler bound to several vectors (I2C event and error lines)
    /// is ticked once.
    pub fn tick(&self, now: u32) {
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(&handler) = slot.get() else {
                continue;
            };
            let seen = self.slots[..i]
                .iter()
                .filter_map(|s| s.get())
                .any(|&earlier| same_handler(earlier, handler));
            if !seen {
                handler.on_tick(now);
            }
        }
    }

    /// Interrupts that arrived on unbound vectors
    pub fn spurious(&self) -> u32 {
        self.spurious.load(Ordering::Relaxed)
    }
}

fn same_handler(a: &dyn InterruptHandler, b: &dyn InterruptHandler) -> bool {
    let a: *const dyn InterruptHandler = a;
    let b: *const dyn InterruptHandler = b;
    core::ptr::addr_eq(a, b)
}

impl TickListener for DispatchTable {
    fn on_tick(&self, now: u32) {
        self.tick(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    struct Counter {
        interrupts: AtomicUsize,
        ticks: AtomicUsize,
    }

    impl Counter {
        const fn new() -> Self {
            Self {
                interrupts: AtomicUsize::new(0),
                ticks: AtomicUsize::new(0),
            }
        }
    }

    impl InterruptHandler for Counter {
        fn on_interrupt(&self) {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_tick(&self, _now: u32) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_vector_indices_match_table_order() {
        for (i, vector) in Vector::ALL.iter().enumerate() {
            assert_eq!(vector.index(), i);
        }
    }

    #[test]
    fn test_dispatch_routes() {
        static USART: Counter = Counter::new();
        static SPI: Counter = Counter::new();
        let table = DispatchTable::new();

        table.register(Vector::Usart2, &USART).unwrap();
        table.register(Vector::Spi1, &SPI).unwrap();

        table.dispatch(Vector::Usart2);
        table.dispatch(Vector::Usart2);
        table.dispatch(Vector::Spi1);

        assert_eq!(USART.interrupts.load(Ordering::SeqCst), 2);
        assert_eq!(SPI.interrupts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_registration_occupied() {
        static FIRST: Counter = Counter::new();
        static SECOND: Counter = Counter::new();
        let table = DispatchTable::new();

        table.register(Vector::I2c1Event, &FIRST).unwrap();
        assert_eq!(table.register(Vector::I2c1Event, &SECOND), Err(Error::Occupied));

        table.dispatch(Vector::I2c1Event);
        assert_eq!(FIRST.interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(SECOND.interrupts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_spurious_counted() {
        let table = DispatchTable::new();
        table.dispatch(Vector::UsbLowPriority);
        assert_eq!(table.spurious(), 1);
        assert!(!table.is_registered(Vector::UsbLowPriority));
    }

    #[test]
    fn test_tick_fans_out_once_per_handler() {
        static I2C: Counter = Counter::new();
        static USART: Counter = Counter::new();
        let table = DispatchTable::new();

        table.register(Vector::I2c3Event, &I2C).unwrap();
        table.register(Vector::I2c3Error, &I2C).unwrap();
        table.register(Vector::Usart6, &USART).unwrap();

        TickListener::on_tick(&table, 42);
        assert_eq!(I2C.ticks.load(Ordering::SeqCst), 1);
        assert_eq!(USART.ticks.load(Ordering::SeqCst), 1);
    }
}
