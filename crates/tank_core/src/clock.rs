//! Fixed-timestep accumulator.
//!
//! Real elapsed time is fed in by the driver; the clock turns it into a whole
//! number of fixed simulation steps. A partial step is never executed, the
//! remainder carries over to the next [`SimulationClock::advance`] call.
//!
//! ```
//! use std::time::Duration;
//! use tank_core::clock::SimulationClock;
//!
//! let mut clock = SimulationClock::new(60);
//! let mut ticks = 0;
//! clock.advance(Duration::from_millis(50), |_| ticks += 1);
//! assert_eq!(ticks, 3);
//! ```

use std::time::Duration;

use tracing::warn;

use crate::math::Fixed;

/// Default simulation rate in ticks per second.
pub const TICK_RATE: u32 = 60;

/// Converts real elapsed time into discrete fixed-duration ticks.
#[derive(Debug, Clone)]
pub struct SimulationClock {
    step: Duration,
    accumulated: Duration,
    total_ticks: u64,
    max_backlog: Option<u32>,
}

impl SimulationClock {
    /// Create a clock running at `tick_rate` steps per second.
    ///
    /// A rate of zero falls back to [`TICK_RATE`].
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let rate = if tick_rate == 0 { TICK_RATE } else { tick_rate };
        Self {
            step: Duration::from_secs(1) / rate,
            accumulated: Duration::ZERO,
            total_ticks: 0,
            max_backlog: None,
        }
    }

    /// Cap the number of steps a single `advance` call may run.
    ///
    /// Whole steps beyond the cap are discarded so a long stall does not
    /// turn into an unbounded catch-up burst. The fractional remainder is kept.
    #[must_use]
    pub fn with_max_backlog(mut self, max_steps: u32) -> Self {
        self.max_backlog = Some(max_steps.max(1));
        self
    }

    /// Length of one fixed step.
    #[must_use]
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Length of one fixed step in seconds, as handed to entity logic.
    #[must_use]
    pub fn step_seconds(&self) -> Fixed {
        duration_to_fixed(self.step)
    }

    /// Time accumulated but not yet consumed by a step.
    #[must_use]
    pub fn remainder(&self) -> Duration {
        self.accumulated
    }

    /// Total steps executed since creation.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Feed `real_delta` of elapsed time and run every whole step it covers.
    ///
    /// `tick_fn` receives the fixed step duration in seconds. Returns the
    /// number of steps executed during this call.
    pub fn advance<F>(&mut self, real_delta: Duration, mut tick_fn: F) -> u32
    where
        F: FnMut(Fixed),
    {
        self.accumulated += real_delta;

        if let Some(max) = self.max_backlog {
            let pending = self.accumulated.as_nanos() / self.step.as_nanos();
            if pending > u128::from(max) {
                let dropped = (pending - u128::from(max)) as u32;
                self.accumulated -= self.step * dropped;
                warn!(dropped, max, "Simulation clock backlog exceeded, dropping steps");
            }
        }

        let dt = self.step_seconds();
        let mut ran = 0;
        while self.accumulated >= self.step {
            self.accumulated -= self.step;
            self.total_ticks += 1;
            ran += 1;
            tick_fn(dt);
        }
        ran
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new(TICK_RATE)
    }
}

/// Convert a duration to fixed-point seconds without floating point.
#[must_use]
pub fn duration_to_fixed(duration: Duration) -> Fixed {
    let secs = i32::try_from(duration.as_secs()).unwrap_or(i32::MAX);
    Fixed::from_num(secs) + Fixed::from_num(duration.subsec_nanos()) / Fixed::from_num(1_000_000_000)
}

/// Convert whole milliseconds to fixed-point seconds.
#[must_use]
pub fn millis_to_fixed(millis: u32) -> Fixed {
    Fixed::from_num(millis) / Fixed::from_num(1000)
}
