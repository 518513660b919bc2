//! CPU Clock.
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::constants::*;

/// Upper bound of cycles a clock reports after a long pause.
///
/// When the host stalls (debugger, window drag, suspended terminal) the
/// clock would otherwise try to catch up by running a burst of cycles.
const MAX_CATCH_UP: u32 = 8;

/// Fixed interval timer to synchronize the driver loop with the software
/// clocks of the virtual machine.
///
/// It is designed to work with the yielding cooperative pattern
/// of the interpreter loop. When the VM yields control back to the
/// caller, time elapses until it is resumed. Once the interpreter
/// is resumed, the elapsed time is taken into account when determining
/// the next cycle.
pub struct Clock {
    interval: Duration,
    last_tick: Instant,
}

impl Clock {
    /// Creates a new clock with the current time as internal state.
    ///
    /// A zero interval means the clock is unthrottled and always ready.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: Instant::now(),
        }
    }

    /// Creates a clock ticking at the given number of cycles per second.
    pub fn from_frequency(hz: u64) -> Self {
        if hz == 0 {
            Self::new(Duration::ZERO)
        } else {
            Self::new(Duration::from_nanos(NANOS_IN_SECOND / hz))
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Set the clock state back to zero.
    pub fn reset(&mut self) {
        self.last_tick = Instant::now()
    }

    /// Consume one elapsed cycle, if there is one.
    ///
    /// Call in a loop to drain every cycle that elapsed since the last call.
    pub fn tick(&mut self) -> bool {
        if self.interval.is_zero() {
            return true;
        }

        let elapsed = self.last_tick.elapsed();
        if elapsed < self.interval {
            return false;
        }

        if elapsed > self.interval * MAX_CATCH_UP {
            // Drop the backlog rather than trying to catch up.
            self.reset();
        } else {
            self.last_tick += self.interval;
        }

        true
    }

    /// Time remaining until the next cycle is due.
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.last_tick.elapsed())
    }

    /// Block the current thread until the next clock cycle is due.
    pub fn wait(&self) {
        while !self.remaining().is_zero() {
            // Sleep does not have enough resolution, and causes
            // the clock to run at 30 FPS.
            //
            // Spinning a loop causes high CPU usage and fan madness.
            //
            // Yielding in a loop is the best alternative.
            thread::yield_now();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clock_frequency() {
        let clock = Clock::from_frequency(DELAY_FREQUENCY);
        assert_eq!(clock.interval().as_nanos(), CLOCK_CYCLE_TIME as u128);
        assert_eq!(clock.interval().as_millis(), 16);
    }

    #[test]
    fn test_unthrottled_clock() {
        let mut clock = Clock::from_frequency(0);
        assert!(clock.tick());
        assert!(clock.tick());
        assert!(clock.remaining().is_zero());
    }

    #[test]
    fn test_tick_waits_for_interval() {
        let mut clock = Clock::new(Duration::from_secs(3600));
        assert!(!clock.tick());
    }

    #[test]
    fn test_tick_after_wait() {
        let mut clock = Clock::new(Duration::from_millis(1));
        clock.wait();
        assert!(clock.tick());
    }
}
