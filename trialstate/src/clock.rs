//! Run clock
//!
//! The clock reports seconds since the start of the run. Two sources exist:
//! a real monotonic source backed by [`Instant`], and a manual source whose
//! time is advanced explicitly (simulated hosts and tests).

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Anything that can report monotonic seconds
pub trait TimeSource {
    /// Seconds elapsed since the source's epoch
    fn seconds(&self) -> f64;
}

/// Monotonic source whose epoch is the moment it was created
#[derive(Debug, Clone, Copy)]
pub struct MonotonicSource {
    origin: Instant,
}

impl MonotonicSource {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicSource {
    fn seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced time shared between the clock and whoever drives it
///
/// Cloning yields another handle onto the same time value.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current manual time
    pub fn get(&self) -> f64 {
        self.now.get()
    }

    /// Jump to an absolute time (may go backwards; the engine rejects that)
    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }

    /// Move time forward
    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl TimeSource for ManualClock {
    fn seconds(&self) -> f64 {
        self.now.get()
    }
}

/// The run clock owned by an experiment
pub struct Clock {
    source: Box<dyn TimeSource>,
}

impl Clock {
    /// Wrap an arbitrary time source
    pub fn new(source: impl TimeSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Real-time clock starting at zero now
    pub fn monotonic() -> Self {
        Self::new(MonotonicSource::new())
    }

    /// Clock driven by a manual handle
    pub fn manual(handle: &ManualClock) -> Self {
        Self::new(handle.clone())
    }

    /// Seconds since the run epoch
    pub fn now(&self) -> f64 {
        self.source.seconds()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").field("now", &self.now()).finish()
    }
}
