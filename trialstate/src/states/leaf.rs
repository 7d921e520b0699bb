//! Leaf actions: Func, Set, Log, Done, ResetClock, Record and Stimulus
//!
//! Wait has no data of its own and is handled entirely by the lifespan logic.

use crate::reference::Ref;
use crate::state::Lifespan;
use crate::types::{StateId, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Host function called by a Func state with its evaluated arguments
pub type Function = Box<dyn FnMut(&[Value]) -> anyhow::Result<Value>>;

/// Calls a function on entry and finishes immediately
pub(crate) struct Func {
    pub function: Function,
    pub args: Vec<Ref>,
    pub result: Value,
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("args", &self.args)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Writes an experiment variable on entry
#[derive(Debug)]
pub(crate) struct SetVar {
    pub var: String,
    pub value: Ref,
}

/// Requests a break from an enclosing Loop
#[derive(Debug)]
pub(crate) struct Done {
    pub target: StateId,
}

/// Ends at the current time, or at `new_time` when given
///
/// States after it in a Serial or Loop are then scheduled from that point
/// rather than from the nominal end of the state before it.
#[derive(Debug)]
pub(crate) struct ResetClock {
    pub new_time: Option<Ref>,
}

/// Named values evaluated on entry and emitted as one log record
#[derive(Debug, Clone, Default)]
pub struct LogValues {
    pub(crate) values: BTreeMap<String, Ref>,
}

impl LogValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a named value
    pub fn value(mut self, name: impl Into<String>, value: impl Into<Ref>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

/// Samples references every tick and logs each change
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub(crate) name: Option<String>,
    pub(crate) lifespan: Lifespan,
    pub(crate) track: BTreeMap<String, Ref>,
    last: Option<BTreeMap<String, Value>>,
    samples: u64,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: track a named reference
    pub fn track(mut self, name: impl Into<String>, value: impl Into<Ref>) -> Self {
        self.track.insert(name.into(), value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn duration(mut self, duration: impl Into<Ref>) -> Self {
        self.lifespan.duration = Some(duration.into());
        self
    }

    pub fn until(mut self, until: impl Into<Ref>) -> Self {
        self.lifespan.until = Some(until.into());
        self
    }

    /// Store a sample; returns true if it differs from the previous one
    pub(crate) fn observe(&mut self, values: BTreeMap<String, Value>) -> bool {
        if self.last.as_ref() == Some(&values) {
            return false;
        }
        self.samples += 1;
        self.last = Some(values);
        true
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
        self.samples = 0;
    }

    pub(crate) fn attribute(&self, name: &str) -> Option<Value> {
        if name == "samples" {
            return Some(Value::Int(self.samples as i64));
        }
        self.last.as_ref().and_then(|last| last.get(name).cloned())
    }
}

/// Asks the presenter to show something for the state's lifespan
#[derive(Debug, Clone)]
pub struct Stimulus {
    pub(crate) name: Option<String>,
    pub(crate) lifespan: Lifespan,
    pub(crate) stimulus: String,
    pub(crate) params: BTreeMap<String, Ref>,
    pub(crate) shown: BTreeMap<String, Value>,
    pub(crate) appear_time: Option<f64>,
    pub(crate) disappear_time: Option<f64>,
}

impl Stimulus {
    /// A stimulus of the given presenter type, e.g. `"Label"`
    pub fn new(stimulus: impl Into<String>) -> Self {
        Self {
            name: None,
            lifespan: Lifespan::default(),
            stimulus: stimulus.into(),
            params: BTreeMap::new(),
            shown: BTreeMap::new(),
            appear_time: None,
            disappear_time: None,
        }
    }

    /// Builder method: add a parameter evaluated on entry
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Ref>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn duration(mut self, duration: impl Into<Ref>) -> Self {
        self.lifespan.duration = Some(duration.into());
        self
    }

    pub fn until(mut self, until: impl Into<Ref>) -> Self {
        self.lifespan.until = Some(until.into());
        self
    }

    pub(crate) fn reset(&mut self) {
        self.shown.clear();
        self.appear_time = None;
        self.disappear_time = None;
    }

    pub(crate) fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "appear_time" => Some(Value::from_time(self.appear_time)),
            "disappear_time" => Some(Value::from_time(self.disappear_time)),
            "stimulus" => Some(Value::Str(self.stimulus.clone())),
            _ => self.shown.get(name).cloned(),
        }
    }
}
