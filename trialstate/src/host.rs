//! Frame and event source
//!
//! The engine never spawns threads or waits on its own. A [`Host`] decides
//! when the next frame happens and which input events arrived in between;
//! [`crate::Experiment::run`] alternates between the two.

use crate::clock::ManualClock;
use crate::event::InputEvent;
use std::collections::VecDeque;
use std::time::Duration;

/// Source of frames and input events
pub trait Host {
    /// Wait for (or simulate) the next frame after `now`
    fn next_frame(&mut self, now: f64);

    /// Events that arrived up to `now`, in arrival order
    fn pending_events(&mut self, now: f64) -> Vec<InputEvent>;
}

/// Host that replays a fixed input timeline against a manual clock
///
/// Each frame advances the clock by one frame period. When pacing is enabled
/// the host also sleeps for the frame period, so a scripted session takes as
/// long as it would in real time.
#[derive(Debug)]
pub struct ScriptedHost {
    clock: ManualClock,
    frame_period: f64,
    script: VecDeque<InputEvent>,
    pace: bool,
    frames: u64,
}

impl ScriptedHost {
    /// Create a host driving `clock` at `frame_rate` frames per second
    pub fn new(clock: ManualClock, frame_rate: f64) -> Self {
        let frame_rate = if frame_rate > 0.0 { frame_rate } else { 60.0 };
        Self {
            clock,
            frame_period: 1.0 / frame_rate,
            script: VecDeque::new(),
            pace: false,
            frames: 0,
        }
    }

    /// Builder method: add scripted events (kept sorted by time)
    pub fn with_events(mut self, events: impl IntoIterator<Item = InputEvent>) -> Self {
        let mut all: Vec<InputEvent> = self.script.drain(..).chain(events).collect();
        all.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.script = all.into();
        self
    }

    /// Builder method: sleep one frame period per frame
    pub fn with_pacing(mut self, enabled: bool) -> Self {
        self.pace = enabled;
        self
    }

    pub fn frame_period(&self) -> f64 {
        self.frame_period
    }

    /// Frames simulated so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Scripted events not yet delivered
    pub fn remaining_events(&self) -> usize {
        self.script.len()
    }
}

impl Host for ScriptedHost {
    fn next_frame(&mut self, _now: f64) {
        if self.pace {
            std::thread::sleep(Duration::from_secs_f64(self.frame_period));
        }
        self.clock.advance(self.frame_period);
        self.frames += 1;
    }

    fn pending_events(&mut self, now: f64) -> Vec<InputEvent> {
        let mut ready = Vec::new();
        while self.script.front().is_some_and(|event| event.time <= now) {
            if let Some(event) = self.script.pop_front() {
                ready.push(event);
            }
        }
        ready
    }
}
