//! Simulation clock. Owns tick state and the simulated millisecond clock.

use crate::types::{Millis, RunId, Tick};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub run_id:       RunId,
    pub current_tick: Tick,
    pub elapsed_ms:   Millis,
    pub ms_per_tick:  Millis,
    pub days_per_tick: f64,
    pub paused:       bool,
}

impl SimClock {
    pub fn new(run_id: RunId, ms_per_tick: Millis, days_per_tick: f64) -> Self {
        Self {
            run_id,
            current_tick: 0,
            elapsed_ms: 0,
            ms_per_tick,
            days_per_tick,
            paused: true,
        }
    }

    /// Advance one tick. Returns the new tick number.
    /// Panics if called while paused; callers must check.
    pub fn advance(&mut self) -> Tick {
        assert!(!self.paused, "advance() called on paused clock");
        self.current_tick += 1;
        self.elapsed_ms = self.elapsed_ms.saturating_add(self.ms_per_tick);
        self.current_tick
    }

    pub fn pause(&mut self)  { self.paused = true;  }
    pub fn resume(&mut self) { self.paused = false; }

    /// Simulated days covered by one tick, for day-based spread and decay.
    pub fn days(&self) -> f64 {
        self.days_per_tick
    }

    /// Whole simulated days since run start.
    pub fn day(&self) -> Tick {
        (self.current_tick as f64 * self.days_per_tick).floor() as Tick
    }
}
