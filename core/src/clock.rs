//! Simulation time.
//!
//! Time is a monotone sequence of discrete ticks. A fixed number of ticks
//! makes a day; a run covers a fixed number of days. The clock never skips
//! and never reads the wall clock.

use serde::{Deserialize, Serialize};

/// Discrete tick/day clock for one simulation run.
///
/// # Example
/// ```
/// use clearsim_core::clock::SimClock;
///
/// let mut clock = SimClock::new(100, 2); // 100 ticks/day, 2 days
/// assert_eq!(clock.current_tick(), 0);
/// clock.advance();
/// assert_eq!(clock.current_tick(), 1);
/// assert_eq!(clock.current_day(), 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    /// Total ticks elapsed since the start of the run
    current_tick: usize,
    /// Ticks in one business day
    ticks_per_day: usize,
    /// Days in the whole run
    num_days: usize,
}

impl SimClock {
    /// Create a clock positioned at tick 0.
    ///
    /// # Panics
    /// Panics if `ticks_per_day` or `num_days` is zero; both are validated
    /// by configuration checks before a clock is ever built.
    pub fn new(ticks_per_day: usize, num_days: usize) -> Self {
        assert!(ticks_per_day > 0, "ticks_per_day must be positive");
        assert!(num_days > 0, "num_days must be positive");
        Self {
            current_tick: 0,
            ticks_per_day,
            num_days,
        }
    }

    /// Advance by one tick.
    pub fn advance(&mut self) {
        self.current_tick += 1;
    }

    /// Total ticks elapsed since the start of the run.
    pub fn current_tick(&self) -> usize {
        self.current_tick
    }

    /// Current day, 0-indexed.
    pub fn current_day(&self) -> usize {
        self.current_tick / self.ticks_per_day
    }

    /// Tick within the current day, 0-indexed.
    pub fn tick_within_day(&self) -> usize {
        self.current_tick % self.ticks_per_day
    }

    /// Ticks remaining in the current day, counting this one.
    pub fn ticks_remaining_in_day(&self) -> usize {
        self.ticks_per_day - self.tick_within_day()
    }

    /// True when the current tick is the last tick of its day.
    pub fn is_end_of_day(&self) -> bool {
        self.tick_within_day() == self.ticks_per_day - 1
    }

    /// First tick past the end of the run.
    pub fn horizon(&self) -> usize {
        self.ticks_per_day * self.num_days
    }

    /// True once every configured tick has been processed.
    pub fn is_finished(&self) -> bool {
        self.current_tick >= self.horizon()
    }

    pub fn ticks_per_day(&self) -> usize {
        self.ticks_per_day
    }

    pub fn num_days(&self) -> usize {
        self.num_days
    }

    /// Restore a clock at an arbitrary position (checkpoint load).
    pub(crate) fn restore(ticks_per_day: usize, num_days: usize, current_tick: usize) -> Self {
        Self {
            current_tick,
            ticks_per_day,
            num_days,
        }
    }
}
