//! Scoped authoring of state trees
//!
//! Every method adds one state to the composite currently open and returns
//! its [`StateId`]. Composite methods take a closure that fills the new
//! composite; children added inside the closure belong to it.
//!
//! ```
//! use trialstate::{Builder, Clock, KeyPress};
//!
//! # fn main() -> trialstate::Result<()> {
//! let mut builder = Builder::new();
//! builder.loop_times(3, |b, _trials| {
//!     b.wait(0.5)?;
//!     b.key_press(KeyPress::new().keys(vec!["J", "K"]).duration(2.0))?;
//!     Ok(())
//! })?;
//! let experiment = builder.build(Clock::monotonic())?;
//! # let _ = experiment;
//! # Ok(())
//! # }
//! ```
//!
//! Authoring mistakes (an `elif` with no `if` before it, a `done` aimed at
//! something other than a loop, clashing names) are reported here, before
//! anything runs.

use crate::clock::Clock;
use crate::experiment::Experiment;
use crate::expr;
use crate::reference::Ref;
use crate::state::{Lifespan, StateTree};
use crate::states::capture::{KeyPress, KeyRecord, PointerPress};
use crate::states::composite::{Branch, Conditional, LoopState, Parallel, ParallelMode, Serial};
use crate::states::leaf::{Done, Func, LogValues, Record, ResetClock, SetVar, Stimulus};
use crate::states::StateKind;
use crate::types::{EngineError, Result, StateId, Value};

/// Name of the root Serial every tree starts with
pub const ROOT_NAME: &str = "root";

/// Builds a [`StateTree`] and turns it into an [`Experiment`]
#[derive(Debug)]
pub struct Builder {
    tree: StateTree,
    root: StateId,
    /// Composite receiving new children
    parent: StateId,
    /// Blocking flag for children added to a Parallel
    blocking: bool,
    /// Conditional that may still take an `elif`/`else_`
    open_if: Option<StateId>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        let (tree, root) = StateTree::with_root(ROOT_NAME, StateKind::Serial(Serial::new(false)));
        Self {
            tree,
            root,
            parent: root,
            blocking: false,
            open_if: None,
        }
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn lookup(&self, name: &str) -> Option<StateId> {
        self.tree.lookup(name)
    }

    /// Compile an expression against the states added so far
    pub fn parse(&self, source: &str) -> Result<Ref> {
        expr::parse(source, &mut |name: &str| self.tree.lookup(name))
    }

    /// Set an experiment variable before the run
    pub fn var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.tree.vars.insert(name.into(), value.into());
    }

    fn add(&mut self, name: Option<String>, kind: StateKind, lifespan: Lifespan) -> Result<StateId> {
        let parent = self.parent;
        let id = self.tree.insert(Some(parent), name, kind)?;
        self.tree.node_mut(id).core.lifespan = lifespan;

        let blocking = self.blocking;
        match &mut self.tree.node_mut(parent).kind {
            StateKind::Serial(serial) => serial.children.push(id),
            StateKind::Parallel(parallel) => parallel.push(id, blocking),
            StateKind::Loop(lp) => lp.body = Some(id),
            // Branch bodies are attached by `add_branch`
            _ => {}
        }
        self.open_if = None;
        log::trace!("Added {} under {}", self.tree.name(id), self.tree.name(parent));
        Ok(id)
    }

    /// Run `body` with `parent` as the open composite
    fn scoped<R>(
        &mut self,
        parent: StateId,
        blocking: bool,
        body: impl FnOnce(&mut Builder) -> Result<R>,
    ) -> Result<R> {
        let saved = (self.parent, self.blocking);
        self.parent = parent;
        self.blocking = blocking;
        self.open_if = None;
        let result = body(self);
        (self.parent, self.blocking) = saved;
        self.open_if = None;
        result
    }

    fn check(&self, id: StateId) -> Result<()> {
        if self.tree.contains(id) {
            Ok(())
        } else {
            Err(EngineError::UnknownState(id.to_string()))
        }
    }

    // Leaves

    /// Wait for a fixed time
    pub fn wait(&mut self, duration: impl Into<Ref>) -> Result<StateId> {
        self.add(None, StateKind::Wait, Lifespan::fixed(duration))
    }

    /// Wait until a condition holds (or a clock time is reached)
    pub fn wait_until(&mut self, until: impl Into<Ref>) -> Result<StateId> {
        self.add(None, StateKind::Wait, Lifespan::until(until))
    }

    pub fn key_press(&mut self, mut key_press: KeyPress) -> Result<StateId> {
        let name = key_press.name.take();
        let lifespan = std::mem::take(&mut key_press.lifespan);
        self.add(name, StateKind::Capture(key_press.into_capture()), lifespan)
    }

    pub fn pointer_press(&mut self, mut pointer_press: PointerPress) -> Result<StateId> {
        let name = pointer_press.name.take();
        let lifespan = std::mem::take(&mut pointer_press.lifespan);
        self.add(name, StateKind::Capture(pointer_press.into_capture()), lifespan)
    }

    /// Log every key event until the state is left
    pub fn key_record(&mut self) -> Result<StateId> {
        self.add(None, StateKind::KeyRecord(KeyRecord::default()), Lifespan::indefinite())
    }

    pub fn record(&mut self, mut record: Record) -> Result<StateId> {
        let name = record.name.take();
        let lifespan = std::mem::take(&mut record.lifespan);
        self.add(name, StateKind::Record(record), lifespan)
    }

    pub fn stimulus(&mut self, mut stimulus: Stimulus) -> Result<StateId> {
        let name = stimulus.name.take();
        let lifespan = std::mem::take(&mut stimulus.lifespan);
        self.add(name, StateKind::Stimulus(stimulus), lifespan)
    }

    /// Call `function` with the evaluated `args` on entry
    pub fn func<F>(&mut self, function: F, args: Vec<Ref>) -> Result<StateId>
    where
        F: FnMut(&[Value]) -> anyhow::Result<Value> + 'static,
    {
        let func = Func {
            function: Box::new(function),
            args,
            result: Value::Null,
        };
        self.add(None, StateKind::Func(func), Lifespan::indefinite())
    }

    /// Assign an experiment variable on entry
    pub fn set(&mut self, var: impl Into<String>, value: impl Into<Ref>) -> Result<StateId> {
        let set = SetVar {
            var: var.into(),
            value: value.into(),
        };
        self.add(None, StateKind::Set(set), Lifespan::indefinite())
    }

    pub fn log(&mut self, values: LogValues) -> Result<StateId> {
        self.add(None, StateKind::Log(values), Lifespan::indefinite())
    }

    /// Ask `target` to stop before its next iteration
    pub fn done(&mut self, target: StateId) -> Result<StateId> {
        self.check(target)?;
        if !matches!(self.tree.node(target).kind, StateKind::Loop(_)) {
            return Err(EngineError::NotALoop(self.tree.name(target).to_string()));
        }
        self.add(None, StateKind::Done(Done { target }), Lifespan::indefinite())
    }

    /// Re-base the schedule: the next sibling starts when this is reached,
    /// not when the previous sibling was due to end
    pub fn reset_clock(&mut self) -> Result<StateId> {
        let reset = ResetClock { new_time: None };
        self.add(None, StateKind::ResetClock(reset), Lifespan::indefinite())
    }

    /// Re-base the schedule to an explicit clock time
    pub fn reset_clock_to(&mut self, new_time: impl Into<Ref>) -> Result<StateId> {
        let reset = ResetClock {
            new_time: Some(new_time.into()),
        };
        self.add(None, StateKind::ResetClock(reset), Lifespan::indefinite())
    }

    // Composites

    /// Children run one after another
    pub fn serial(&mut self, body: impl FnOnce(&mut Builder) -> Result<()>) -> Result<StateId> {
        let id = self.add(None, StateKind::Serial(Serial::new(false)), Lifespan::indefinite())?;
        self.scoped(id, false, body)?;
        Ok(id)
    }

    /// A named Serial grouping a reusable block
    pub fn subroutine(
        &mut self,
        name: impl Into<String>,
        body: impl FnOnce(&mut Builder) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.add(
            Some(name.into()),
            StateKind::Serial(Serial::new(true)),
            Lifespan::indefinite(),
        )?;
        self.scoped(id, false, body)?;
        Ok(id)
    }

    /// Children run together; finishes when all of them have
    pub fn parallel(&mut self, body: impl FnOnce(&mut Builder) -> Result<()>) -> Result<StateId> {
        let id = self.add(
            None,
            StateKind::Parallel(Parallel::new(ParallelMode::All)),
            Lifespan::indefinite(),
        )?;
        self.scoped(id, false, body)?;
        Ok(id)
    }

    /// `background` runs alongside `primary` and is cut when `primary` ends
    pub fn meanwhile(
        &mut self,
        primary: impl FnOnce(&mut Builder) -> Result<()>,
        background: impl FnOnce(&mut Builder) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.add(
            None,
            StateKind::Parallel(Parallel::new(ParallelMode::Meanwhile)),
            Lifespan::indefinite(),
        )?;
        self.scoped(id, true, |b| b.serial(primary))?;
        self.scoped(id, false, |b| b.serial(background))?;
        Ok(id)
    }

    /// `background` runs until `distinguished` ends
    pub fn until_done(
        &mut self,
        background: impl FnOnce(&mut Builder) -> Result<()>,
        distinguished: impl FnOnce(&mut Builder) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.add(
            None,
            StateKind::Parallel(Parallel::new(ParallelMode::UntilDone)),
            Lifespan::indefinite(),
        )?;
        self.scoped(id, false, |b| b.serial(background))?;
        self.scoped(id, true, |b| b.serial(distinguished))?;
        Ok(id)
    }

    fn add_loop(
        &mut self,
        items: Option<Vec<Value>>,
        body: impl FnOnce(&mut Builder, StateId) -> Result<()>,
    ) -> Result<StateId> {
        let lp = LoopState {
            items,
            ..LoopState::default()
        };
        let id = self.add(None, StateKind::Loop(lp), Lifespan::indefinite())?;
        self.scoped(id, false, |b| b.serial(|b| body(b, id)))?;
        Ok(id)
    }

    fn set_condition(&mut self, id: StateId, condition: Ref) {
        if let StateKind::Loop(lp) = &mut self.tree.node_mut(id).kind {
            lp.condition = Some(condition);
        }
    }

    /// Repeat until broken by `done` or cut by a lifespan
    ///
    /// The body closure receives the loop's id, for `done` and `@loop.i`.
    pub fn loop_forever(&mut self, body: impl FnOnce(&mut Builder, StateId) -> Result<()>) -> Result<StateId> {
        self.add_loop(None, body)
    }

    /// Repeat `times` times
    pub fn loop_times(
        &mut self,
        times: i64,
        body: impl FnOnce(&mut Builder, StateId) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.add_loop(None, body)?;
        self.set_condition(id, id.attr("i").lt(times));
        Ok(id)
    }

    /// Repeat while a condition holds, checked before each iteration
    ///
    /// `condition` is built after the body so it may refer to states inside it.
    pub fn loop_while(
        &mut self,
        condition: impl FnOnce(&Builder, StateId) -> Result<Ref>,
        body: impl FnOnce(&mut Builder, StateId) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.add_loop(None, body)?;
        let condition = condition(self, id)?;
        self.set_condition(id, condition);
        Ok(id)
    }

    /// Run the body once per item; `@loop.current` holds the item
    pub fn loop_over(
        &mut self,
        items: Vec<Value>,
        body: impl FnOnce(&mut Builder, StateId) -> Result<()>,
    ) -> Result<StateId> {
        self.add_loop(Some(items), body)
    }

    fn add_branch(
        &mut self,
        cond: StateId,
        guard: Option<Ref>,
        body: impl FnOnce(&mut Builder) -> Result<()>,
    ) -> Result<()> {
        let block = self.scoped(cond, false, |b| b.serial(body))?;
        if let StateKind::Conditional(conditional) = &mut self.tree.node_mut(cond).kind {
            conditional.branches.push(Branch { guard, body: block });
        }
        self.open_if = Some(cond);
        Ok(())
    }

    /// Start an If; chain `elif` and `else_` directly after it
    pub fn if_(
        &mut self,
        condition: impl Into<Ref>,
        body: impl FnOnce(&mut Builder) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.add(
            None,
            StateKind::Conditional(Conditional::default()),
            Lifespan::indefinite(),
        )?;
        self.add_branch(id, Some(condition.into()), body)?;
        Ok(id)
    }

    fn open_conditional(&self, keyword: &'static str) -> Result<StateId> {
        let id = self.open_if.ok_or(EngineError::BranchWithoutIf { keyword })?;
        match &self.tree.node(id).kind {
            StateKind::Conditional(conditional) if conditional.has_else() => {
                Err(EngineError::BranchAfterElse(self.tree.name(id).to_string()))
            }
            _ => Ok(id),
        }
    }

    pub fn elif(
        &mut self,
        condition: impl Into<Ref>,
        body: impl FnOnce(&mut Builder) -> Result<()>,
    ) -> Result<StateId> {
        let id = self.open_conditional("Elif")?;
        self.add_branch(id, Some(condition.into()), body)?;
        Ok(id)
    }

    pub fn else_(&mut self, body: impl FnOnce(&mut Builder) -> Result<()>) -> Result<StateId> {
        let id = self.open_conditional("Else")?;
        self.add_branch(id, None, body)?;
        Ok(id)
    }

    // Options on existing states

    pub fn named(&mut self, id: StateId, name: &str) -> Result<()> {
        self.check(id)?;
        self.tree.rename(id, name)
    }

    pub fn with_duration(&mut self, id: StateId, duration: impl Into<Ref>) -> Result<()> {
        self.check(id)?;
        self.tree.node_mut(id).core.lifespan.duration = Some(duration.into());
        Ok(())
    }

    pub fn with_until(&mut self, id: StateId, until: impl Into<Ref>) -> Result<()> {
        self.check(id)?;
        self.tree.node_mut(id).core.lifespan.until = Some(until.into());
        Ok(())
    }

    /// Whether the state's exit record goes to the log sink
    pub fn set_save_log(&mut self, id: StateId, save: bool) -> Result<()> {
        self.check(id)?;
        self.tree.node_mut(id).core.save_log = save;
        Ok(())
    }

    /// Finish authoring
    pub fn build(self, clock: Clock) -> Result<Experiment> {
        log::debug!("Built state tree with {} states", self.tree.len());
        Ok(Experiment::new(self.tree, self.root, clock))
    }
}
