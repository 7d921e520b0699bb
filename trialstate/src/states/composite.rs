//! Composite states: Serial, Parallel (and Meanwhile/UntilDone), Loop and If
//!
//! Composites only hold bookkeeping here. Entering and polling their children
//! happens in [`crate::experiment::Experiment`], which owns the arena.

use crate::reference::Ref;
use crate::types::{StateId, Value};

/// Runs children one after another
///
/// Each child starts at the previous child's end time, not at the time the
/// composite got around to entering it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Serial {
    pub children: Vec<StateId>,
    pub cursor: usize,
    pub next_start: Option<f64>,
    /// Named reusable block; labelled `Subroutine` in logs
    pub subroutine: bool,
}

impl Serial {
    pub fn new(subroutine: bool) -> Self {
        Self {
            subroutine,
            ..Self::default()
        }
    }

    pub fn label(&self) -> &'static str {
        if self.subroutine {
            "Subroutine"
        } else {
            "Serial"
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.next_start = None;
    }
}

/// Completion rule of a Parallel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelMode {
    /// Leave when every blocking child has left
    #[default]
    All,
    /// Primary children block; background children are forced out
    Meanwhile,
    /// Leave as soon as the distinguished child leaves
    UntilDone,
}

impl ParallelMode {
    pub fn label(&self) -> &'static str {
        match self {
            ParallelMode::All => "Parallel",
            ParallelMode::Meanwhile => "Meanwhile",
            ParallelMode::UntilDone => "UntilDone",
        }
    }
}

/// Runs children concurrently
#[derive(Debug, Clone, Default)]
pub(crate) struct Parallel {
    pub children: Vec<StateId>,
    /// Parallel to `children`
    pub blocking: Vec<bool>,
    pub mode: ParallelMode,
}

impl Parallel {
    pub fn new(mode: ParallelMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn push(&mut self, child: StateId, blocking: bool) {
        self.children.push(child);
        self.blocking.push(blocking);
    }

    /// Children whose completion ends the Parallel
    ///
    /// If no child was marked blocking, all of them are.
    pub fn blocking_children(&self) -> Vec<StateId> {
        let marked: Vec<StateId> = self
            .children
            .iter()
            .zip(&self.blocking)
            .filter(|(_, blocking)| **blocking)
            .map(|(child, _)| *child)
            .collect();
        if marked.is_empty() {
            self.children.clone()
        } else {
            marked
        }
    }
}

/// Repeats a body subtree
///
/// Without a condition or items the loop runs forever, until a `Done` breaks
/// it or its lifespan cuts it. `times(n)` is the condition `i < n`.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoopState {
    pub body: Option<StateId>,
    pub condition: Option<Ref>,
    pub items: Option<Vec<Value>>,
    pub i: i64,
    pub current: Value,
    /// Set by a `Done` state; checked before the next iteration starts
    pub break_requested: bool,
    pub next_start: Option<f64>,
    /// Body entered for iteration `i`
    pub in_iteration: bool,
}

impl LoopState {
    pub fn reset(&mut self) {
        self.i = 0;
        self.current = Value::Null;
        self.break_requested = false;
        self.next_start = None;
        self.in_iteration = false;
    }

    /// Item for iteration `i` when looping over a list
    pub fn item(&self, i: i64) -> Option<Value> {
        let items = self.items.as_ref()?;
        usize::try_from(i).ok().and_then(|i| items.get(i).cloned())
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "i" => Some(Value::Int(self.i)),
            "current" => Some(self.current.clone()),
            "items" => self.items.clone().map(Value::List),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Branch {
    /// None for the Else branch
    pub guard: Option<Ref>,
    pub body: StateId,
}

/// If / Elif / Else chain; guards are evaluated once, on entry
#[derive(Debug, Clone, Default)]
pub(crate) struct Conditional {
    pub branches: Vec<Branch>,
    pub chosen: Option<usize>,
}

impl Conditional {
    pub fn has_else(&self) -> bool {
        self.branches.last().is_some_and(|b| b.guard.is_none())
    }
}
