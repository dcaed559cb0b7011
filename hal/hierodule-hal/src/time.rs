//! Time base provided by the timer module
//!
//! The core never programs a timer itself. It reads a free-running tick
//! counter and asks for a periodic callback to run timeout bookkeeping.

/// Tick source
///
/// Ticks are monotonic and wrap at `u32::MAX`; compare them with
/// [`elapsed`], never with `<`.
pub trait TimeBase {
    /// Current tick count
    fn current_tick(&self) -> u32;

    /// Call `listener` every `interval` ticks from the timer interrupt
    fn register_periodic_callback(&mut self, interval: u32, listener: &'static dyn TickListener);
}

impl<T: TimeBase + ?Sized> TimeBase for &mut T {
    fn current_tick(&self) -> u32 {
        (**self).current_tick()
    }

    fn register_periodic_callback(&mut self, interval: u32, listener: &'static dyn TickListener) {
        (**self).register_periodic_callback(interval, listener)
    }
}

/// Receiver of periodic tick notifications
pub trait TickListener: Sync {
    /// Called with the tick count at the time of the notification
    fn on_tick(&self, now: u32);
}

/// Ticks elapsed from `start` to `now`, correct across one wrap
pub fn elapsed(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_simple() {
        assert_eq!(elapsed(100, 250), 150);
        assert_eq!(elapsed(7, 7), 0);
    }

    #[test]
    fn test_elapsed_across_wrap() {
        assert_eq!(elapsed(u32::MAX - 9, 10), 20);
    }
}
