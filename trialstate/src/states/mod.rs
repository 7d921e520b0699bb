//! State kinds
//!
//! This module contains the per-kind data of every state: leaf actions,
//! input capture and the composites that sequence their children. The
//! lifecycle itself (enter, poll, leave) is driven by
//! [`crate::experiment::Experiment`].

use crate::types::{StateId, Value};

pub mod capture;
pub mod composite;
pub mod leaf;

// Re-export authoring types
pub use capture::{KeyPress, PointerPress};
pub use composite::ParallelMode;
pub use leaf::{Function, LogValues, Record, Stimulus};

use capture::{Capture, KeyRecord};
use composite::{Conditional, LoopState, Parallel, Serial};
use leaf::{Done, Func, ResetClock, SetVar};

/// Behavior attached to a node of the state arena
#[derive(Debug)]
pub(crate) enum StateKind {
    Wait,
    Func(Func),
    Set(SetVar),
    Log(LogValues),
    Done(Done),
    ResetClock(ResetClock),
    Record(Record),
    Stimulus(Stimulus),
    Capture(Capture),
    KeyRecord(KeyRecord),
    Serial(Serial),
    Parallel(Parallel),
    Loop(LoopState),
    Conditional(Conditional),
}

impl StateKind {
    /// Name of the kind, used for auto-generated state names and log records
    pub fn label(&self) -> &'static str {
        match self {
            StateKind::Wait => "Wait",
            StateKind::Func(_) => "Func",
            StateKind::Set(_) => "Set",
            StateKind::Log(_) => "Log",
            StateKind::Done(_) => "Done",
            StateKind::ResetClock(_) => "ResetClock",
            StateKind::Record(_) => "Record",
            StateKind::Stimulus(_) => "Stimulus",
            StateKind::Capture(capture) => capture.label(),
            StateKind::KeyRecord(_) => "KeyRecord",
            StateKind::Serial(serial) => serial.label(),
            StateKind::Parallel(parallel) => parallel.mode.label(),
            StateKind::Loop(_) => "Loop",
            StateKind::Conditional(_) => "If",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            StateKind::Serial(_) | StateKind::Parallel(_) | StateKind::Loop(_) | StateKind::Conditional(_)
        )
    }

    /// Direct children, in declaration order
    pub fn children(&self) -> Vec<StateId> {
        match self {
            StateKind::Serial(serial) => serial.children.clone(),
            StateKind::Parallel(parallel) => parallel.children.clone(),
            StateKind::Loop(lp) => lp.body.into_iter().collect(),
            StateKind::Conditional(cond) => cond.branches.iter().map(|b| b.body).collect(),
            _ => Vec::new(),
        }
    }

    /// Clear per-activation fields
    pub fn reset(&mut self) {
        match self {
            StateKind::Func(func) => func.result = Value::Null,
            StateKind::Record(record) => record.reset(),
            StateKind::Stimulus(stimulus) => stimulus.reset(),
            StateKind::Capture(capture) => capture.reset(),
            StateKind::KeyRecord(recorder) => recorder.reset(),
            StateKind::Serial(serial) => serial.reset(),
            StateKind::Loop(lp) => lp.reset(),
            StateKind::Conditional(cond) => cond.chosen = None,
            StateKind::Wait
            | StateKind::Set(_)
            | StateKind::Log(_)
            | StateKind::Done(_)
            | StateKind::ResetClock(_)
            | StateKind::Parallel(_) => {}
        }
    }

    /// Kind-specific attribute lookup
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match self {
            StateKind::Func(func) => (name == "result").then(|| func.result.clone()),
            StateKind::Record(record) => record.attribute(name),
            StateKind::Stimulus(stimulus) => stimulus.attribute(name),
            StateKind::Capture(capture) => capture.attribute(name),
            StateKind::KeyRecord(recorder) => recorder.attribute(name),
            StateKind::Loop(lp) => lp.attribute(name),
            StateKind::Conditional(cond) => match name {
                "branch" => Some(cond.chosen.map_or(Value::Null, |i| Value::Int(i as i64))),
                _ => None,
            },
            _ => None,
        }
    }

    /// Kind-specific attributes included in exit records
    pub fn log_attrs(&self) -> &'static [&'static str] {
        match self {
            StateKind::Func(_) => &["result"],
            StateKind::Record(_) => &["samples"],
            StateKind::Stimulus(_) => &["appear_time", "disappear_time"],
            StateKind::Capture(capture) => capture.log_attrs(),
            StateKind::KeyRecord(_) => &["count"],
            StateKind::Loop(_) => &["i"],
            StateKind::Conditional(_) => &["branch"],
            _ => &[],
        }
    }
}
