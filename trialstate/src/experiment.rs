//! Experiment runtime
//!
//! An [`Experiment`] owns the state arena and drives it one tick at a time:
//!
//! 1. On the first tick the root is entered at the current clock time.
//! 2. Every tick polls the root. Composites enter their children lazily while
//!    polling, at the time the previous child ended, so schedules never drift
//!    by the tick period.
//! 3. Input events are delivered between ticks through [`Experiment::dispatch`];
//!    capture states consume them and leave at the event timestamp. An event
//!    stamped after the last tick first brings the tree up to its time.
//!
//! A failure inside one state is captured at that state's boundary: the state
//! is left, the fault is collected, and the current tick (or dispatch) returns
//! [`EngineError::Faulted`] after tearing the run down. Nothing is swallowed.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::event::{EventKind, InputEvent};
use crate::host::Host;
use crate::presenter::{NullPresenter, Presenter, StimulusRequest};
use crate::reference::Ref;
use crate::sink::{LogRecord, LogSink, NullSink};
use crate::state::StateTree;
use crate::states::capture::KeyRecord;
use crate::states::StateKind;
use crate::types::{EngineError, FaultReport, Phase, Result, StateFault, StateId, Value};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Outcome of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Running,
    Finished,
}

/// Statistics of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ticks: u64,
    /// Root start time on the experiment clock
    pub start_time: Option<f64>,
    /// Root end time on the experiment clock
    pub end_time: Option<f64>,
    /// Wall-clock time of the first tick
    pub session_started: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn duration(&self) -> Option<f64> {
        Some(self.end_time? - self.start_time?)
    }
}

/// Work to do after a state has been marked active
enum EnterStep {
    Stay,
    Finish,
    Call(Vec<Ref>),
    Assign(String, Ref),
    Emit(BTreeMap<String, Ref>),
    Break(StateId),
    Rebase(Option<Ref>),
    Sample,
    Show(String, BTreeMap<String, Ref>),
    Arm {
        kind: EventKind,
        base_time: Option<Ref>,
    },
    Subscribe,
    Choose(Vec<Option<Ref>>),
}

enum PollStep {
    Idle,
    Sample,
    Serial,
    Parallel,
    Loop,
    Branch(Option<StateId>),
}

/// A built state tree bound to a clock, a log sink and a presenter
pub struct Experiment {
    tree: StateTree,
    root: StateId,
    clock: Clock,
    dispatcher: Dispatcher<StateId>,
    sink: Box<dyn LogSink>,
    presenter: Box<dyn Presenter>,
    config: EngineConfig,
    faults: Vec<StateFault>,
    last_tick: Option<f64>,
    ticks: u64,
    session_started: Option<DateTime<Utc>>,
    terminated: bool,
}

impl Experiment {
    pub(crate) fn new(tree: StateTree, root: StateId, clock: Clock) -> Self {
        Self {
            tree,
            root,
            clock,
            dispatcher: Dispatcher::new(),
            sink: Box::new(NullSink),
            presenter: Box::new(NullPresenter),
            config: EngineConfig::default(),
            faults: Vec::new(),
            last_tick: None,
            ticks: 0,
            session_started: None,
            terminated: false,
        }
    }

    /// Builder method: where exit records go
    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Builder method: who shows stimuli
    pub fn with_presenter(mut self, presenter: impl Presenter + 'static) -> Self {
        self.presenter = Box::new(presenter);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        if let Some(seed) = config.seed {
            self.tree.reseed(seed);
        }
        self.config = config;
        self
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Find a state by name
    pub fn lookup(&self, name: &str) -> Option<StateId> {
        self.tree.lookup(name)
    }

    pub fn phase(&self, id: StateId) -> Phase {
        self.tree.phase(id)
    }

    pub fn attribute(&self, id: StateId, name: &str) -> Result<Value> {
        self.tree.attribute(id, name)
    }

    /// Evaluate a reference against the current state of the run
    pub fn eval(&self, reference: &Ref) -> Result<Value> {
        reference.eval(&self.tree)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.tree.get_var(name)
    }

    /// Set an experiment variable from outside the tree
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.tree.vars.insert(name.into(), value.into());
    }

    /// Number of live input subscriptions for `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.dispatcher.subscriber_count(kind)
    }

    pub fn is_subscribed(&self, id: StateId) -> bool {
        self.dispatcher.has_owner(id)
    }

    /// True once the root has finished or the run was terminated
    pub fn is_finished(&self) -> bool {
        self.terminated || self.tree.phase(self.root) == Phase::Finished
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            ticks: self.ticks,
            start_time: self.tree.start_time(self.root),
            end_time: self.tree.end_time(self.root),
            session_started: self.session_started,
        }
    }

    /// Advance the experiment to the current clock time
    pub fn tick(&mut self) -> Result<TickStatus> {
        if self.terminated {
            return Err(EngineError::RunFinished);
        }
        let now = self.clock.now();
        if let Some(last) = self.last_tick {
            if now < last {
                log::error!("Clock went backwards: {:.6}s after {:.6}s", now, last);
                self.teardown(last);
                return Err(EngineError::ClockRegression {
                    state: self.tree.name(self.root).to_string(),
                    reference: last,
                    now,
                });
            }
        }
        self.last_tick = Some(now);
        self.ticks += 1;

        if self.tree.phase(self.root) == Phase::Unstarted {
            let started = Utc::now();
            log::info!("Session started at {}", started.to_rfc3339());
            self.session_started = Some(started);
            self.enter_guarded(self.root, now, now);
        }
        if self.tree.phase(self.root) == Phase::Active {
            self.poll_guarded(self.root, now);
        }

        self.check_faults(now)?;
        if self.tree.phase(self.root) == Phase::Finished {
            self.terminated = true;
            log::info!(
                "Experiment finished at {:.6}s after {} ticks",
                self.tree.end_time(self.root).unwrap_or(now),
                self.ticks
            );
            Ok(TickStatus::Finished)
        } else {
            Ok(TickStatus::Running)
        }
    }

    /// Deliver one input event to every state subscribed to its kind
    ///
    /// An event stamped after the last tick first brings the tree up to the
    /// event time, so states whose deadline passed before the event (or whose
    /// parent ended before it) are gone and cannot consume it.
    ///
    /// Subscribers are visited in registration order over a snapshot taken
    /// before delivery; a subscriber removed by an earlier delivery is
    /// skipped. Returns the number of subscribers that saw the event.
    pub fn dispatch(&mut self, event: &InputEvent) -> Result<usize> {
        if self.terminated {
            return Err(EngineError::RunFinished);
        }
        log::trace!("Dispatching {} at {:.6}s", event.kind, event.time);
        if self.last_tick.is_some_and(|last| event.time > last) {
            self.catch_up(event.time)?;
        }

        let mut delivered = 0;
        for (callback, owner) in self.dispatcher.snapshot(event.kind) {
            if !self.dispatcher.is_registered(event.kind, callback) {
                continue;
            }
            delivered += 1;
            if let Err(error) = self.deliver(owner, event) {
                self.fault(owner, event.time, error);
            }
        }

        let now = self.last_tick.unwrap_or(event.time).max(event.time);
        self.check_faults(now)?;
        Ok(delivered)
    }

    /// Run to completion against a host
    pub fn run(&mut self, host: &mut dyn Host) -> Result<RunSummary> {
        loop {
            if self.tick()? == TickStatus::Finished {
                break;
            }
            if let Some(limit) = self.config.max_ticks {
                if self.ticks >= limit {
                    log::warn!("Stopping after {} ticks", limit);
                    self.teardown(self.clock.now());
                    return Err(EngineError::TickLimit(limit));
                }
            }
            host.next_frame(self.clock.now());
            let now = self.clock.now();
            for event in host.pending_events(now) {
                self.dispatch(&event)?;
            }
        }
        Ok(self.summary())
    }

    /// Poll the tree to `time` between ticks
    fn catch_up(&mut self, time: f64) -> Result<()> {
        self.last_tick = Some(time);
        if self.is_active(self.root) {
            log::trace!("Catching up to {:.6}s before delivery", time);
            self.poll_guarded(self.root, time);
        }
        self.check_faults(time)
    }

    fn teardown(&mut self, at: f64) {
        self.leave(self.root, at);
        self.terminated = true;
    }

    fn check_faults(&mut self, now: f64) -> Result<()> {
        if self.faults.is_empty() {
            return Ok(());
        }
        self.teardown(now);
        let report = FaultReport {
            faults: std::mem::take(&mut self.faults),
        };
        log::error!("Run terminated: {}", report);
        Err(EngineError::Faulted(report))
    }

    fn fault(&mut self, id: StateId, time: f64, error: EngineError) {
        let state_name = self.tree.name(id).to_string();
        log::error!("State `{}` failed at {:.6}s: {}", state_name, time, error);
        self.leave(id, time);
        self.faults.push(StateFault {
            state: id,
            state_name,
            time,
            error: Box::new(error),
        });
    }

    fn enter_guarded(&mut self, id: StateId, start: f64, now: f64) {
        if let Err(error) = self.enter(id, start, now) {
            self.fault(id, now, error);
        }
    }

    fn poll_guarded(&mut self, id: StateId, now: f64) {
        if let Err(error) = self.poll(id, now) {
            self.fault(id, now, error);
        }
    }

    fn is_active(&self, id: StateId) -> bool {
        self.tree.phase(id) == Phase::Active
    }

    /// Start a state at `start`; `now` is the latest time it may observe
    fn enter(&mut self, id: StateId, start: f64, now: f64) -> Result<()> {
        let node = self.tree.node_mut(id);
        if node.core.phase != Phase::Unstarted {
            return Err(EngineError::Reentered(node.core.name.clone()));
        }
        node.core.phase = Phase::Active;
        node.core.start_time = Some(start);
        node.core.end_time = None;
        node.core.duration_deadline = None;
        node.core.until_deadline = None;
        node.core.activation += 1;
        node.kind.reset();
        log::debug!(
            "Enter {} #{} at {:.6}s",
            node.core.name,
            node.core.activation,
            start
        );

        let duration = match node.core.lifespan.duration.clone() {
            Some(duration) => Some(duration.eval(&self.tree)?.expect_f64()?.max(0.0)),
            None => None,
        };
        self.tree.node_mut(id).core.duration_deadline = duration.map(|d| start + d);

        let step = match &self.tree.node(id).kind {
            StateKind::Wait | StateKind::Parallel(_) => EnterStep::Stay,
            StateKind::Func(func) => EnterStep::Call(func.args.clone()),
            StateKind::Set(set) => EnterStep::Assign(set.var.clone(), set.value.clone()),
            StateKind::Log(log) => EnterStep::Emit(log.values.clone()),
            StateKind::Done(done) => EnterStep::Break(done.target),
            StateKind::ResetClock(reset) => EnterStep::Rebase(reset.new_time.clone()),
            StateKind::Record(_) => EnterStep::Sample,
            StateKind::Stimulus(stimulus) => {
                EnterStep::Show(stimulus.stimulus.clone(), stimulus.params.clone())
            }
            StateKind::Capture(capture) => EnterStep::Arm {
                kind: capture.event_kind(),
                base_time: capture.base_time_src.clone(),
            },
            StateKind::KeyRecord(_) => EnterStep::Subscribe,
            StateKind::Serial(serial) if serial.children.is_empty() => EnterStep::Finish,
            StateKind::Serial(_) => EnterStep::Stay,
            StateKind::Loop(_) => EnterStep::Stay,
            StateKind::Conditional(cond) => {
                EnterStep::Choose(cond.branches.iter().map(|b| b.guard.clone()).collect())
            }
        };

        match step {
            EnterStep::Stay => {}
            EnterStep::Finish => self.leave(id, start),
            EnterStep::Call(args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(&self.tree))
                    .collect::<Result<Vec<_>>>()?;
                let state = self.tree.name(id).to_string();
                if let StateKind::Func(func) = &mut self.tree.node_mut(id).kind {
                    let result = (func.function)(&values).map_err(|e| EngineError::FunctionFailed {
                        state,
                        message: format!("{:#}", e),
                    })?;
                    func.result = result;
                }
                self.leave(id, start);
            }
            EnterStep::Assign(var, value) => {
                let value = value.eval(&self.tree)?;
                log::debug!("Set ${} = {}", var, value);
                self.tree.vars.insert(var, value);
                self.leave(id, start);
            }
            EnterStep::Emit(refs) => {
                let values = self.eval_map(&refs)?;
                let record = LogRecord {
                    state: self.tree.name(id).to_string(),
                    kind: "Log",
                    activation: self.tree.activation(id),
                    time: start,
                    values,
                };
                self.sink.record(record);
                self.leave(id, start);
            }
            EnterStep::Break(target) => {
                let running = self.is_active(target);
                if let StateKind::Loop(lp) = &mut self.tree.node_mut(target).kind {
                    if running {
                        lp.break_requested = true;
                    }
                }
                if running {
                    log::debug!("Break requested for {}", self.tree.name(target));
                } else {
                    log::warn!(
                        "{} targets {}, which is not running",
                        self.tree.name(id),
                        self.tree.name(target)
                    );
                }
                self.leave(id, start);
            }
            EnterStep::Rebase(new_time) => {
                let target = match new_time {
                    Some(time) => match time.eval(&self.tree)? {
                        Value::Null => now,
                        value => value.expect_f64()?,
                    },
                    None => now,
                };
                log::debug!("{} re-bases the schedule to {:.6}s", self.tree.name(id), target);
                if target <= now {
                    self.leave(id, target);
                } else {
                    // Behaves like a wait until the requested time
                    let core = &mut self.tree.node_mut(id).core;
                    core.duration_deadline = Some(core.duration_deadline.map_or(target, |d| d.min(target)));
                }
            }
            EnterStep::Sample => self.sample(id, start)?,
            EnterStep::Show(stimulus, params) => {
                let params = self.eval_map(&params)?;
                let request = StimulusRequest {
                    state: id,
                    stimulus,
                    params: params.clone(),
                    requested_at: now,
                };
                let onset = self.presenter.show(&request).unwrap_or(now);
                if let StateKind::Stimulus(stimulus) = &mut self.tree.node_mut(id).kind {
                    stimulus.shown = params;
                    stimulus.appear_time = Some(onset);
                }
            }
            EnterStep::Arm { kind, base_time } => {
                // Subscribe and fix the base time in the same step so no
                // event can fall between the two.
                self.dispatcher.add_callback(kind, id);
                let base_time = match base_time {
                    Some(base_time) => match base_time.eval(&self.tree)? {
                        Value::Null => start,
                        value => value.expect_f64()?,
                    },
                    None => start,
                };
                let (accepted, correct) = self.capture_sets(id)?;
                let node = self.tree.node_mut(id);
                if let StateKind::Capture(capture) = &mut node.kind {
                    capture.base_time = Some(base_time);
                    capture.set_sets(accepted, correct);
                }
                node.core.duration_deadline = duration.map(|d| base_time + d);
            }
            EnterStep::Subscribe => {
                for kind in KeyRecord::CHANNELS {
                    self.dispatcher.add_callback(kind, id);
                }
            }
            EnterStep::Choose(guards) => {
                let mut chosen = None;
                for (index, guard) in guards.iter().enumerate() {
                    let taken = match guard {
                        Some(guard) => guard.eval(&self.tree)?.truthy(),
                        None => true,
                    };
                    if taken {
                        chosen = Some(index);
                        break;
                    }
                }
                if let StateKind::Conditional(cond) = &mut self.tree.node_mut(id).kind {
                    cond.chosen = chosen;
                }
                if chosen.is_none() {
                    self.leave(id, start);
                }
            }
        }
        Ok(())
    }

    /// Bring an active state up to `now`
    fn poll(&mut self, id: StateId, now: f64) -> Result<()> {
        if !self.is_active(id) {
            return Ok(());
        }
        let node = self.tree.node(id);
        let start = node.core.start_time.unwrap_or(now);
        if now < start {
            return Err(EngineError::ClockRegression {
                state: node.core.name.clone(),
                reference: start,
                now,
            });
        }

        if let Some(until) = node.core.lifespan.until.clone() {
            match until.eval(&self.tree)? {
                Value::Bool(true) => {
                    self.leave(id, now);
                    return Ok(());
                }
                Value::Bool(false) | Value::Null => {
                    self.tree.node_mut(id).core.until_deadline = None;
                }
                value => {
                    let deadline = value.expect_f64()?.max(start);
                    self.tree.node_mut(id).core.until_deadline = Some(deadline);
                }
            }
        }

        let deadline = self.tree.node(id).core.deadline();
        let horizon = deadline.map_or(now, |d| d.min(now));

        let step = match &self.tree.node(id).kind {
            StateKind::Record(_) => PollStep::Sample,
            StateKind::Serial(_) => PollStep::Serial,
            StateKind::Parallel(_) => PollStep::Parallel,
            StateKind::Loop(_) => PollStep::Loop,
            StateKind::Conditional(cond) => {
                PollStep::Branch(cond.chosen.map(|index| cond.branches[index].body))
            }
            _ => PollStep::Idle,
        };
        match step {
            PollStep::Idle => {}
            PollStep::Sample => self.sample(id, horizon)?,
            PollStep::Serial => self.poll_serial(id, start, horizon),
            PollStep::Parallel => self.poll_parallel(id, start, horizon),
            PollStep::Loop => self.poll_loop(id, start, horizon)?,
            PollStep::Branch(Some(body)) => {
                if self.tree.phase(body) == Phase::Unstarted {
                    self.enter_guarded(body, start, horizon);
                }
                self.poll_guarded(body, horizon);
                if self.tree.phase(body) == Phase::Finished {
                    let end = self.tree.end_time(body).unwrap_or(horizon);
                    self.leave(id, end);
                }
            }
            PollStep::Branch(None) => {}
        }

        if let Some(deadline) = deadline {
            if self.is_active(id) && now >= deadline {
                log::trace!("{} reached its deadline {:.6}s", self.tree.name(id), deadline);
                self.leave(id, deadline);
            }
        }
        Ok(())
    }

    fn poll_serial(&mut self, id: StateId, start: f64, horizon: f64) {
        while self.is_active(id) && self.faults.is_empty() {
            let StateKind::Serial(serial) = &self.tree.node(id).kind else {
                return;
            };
            let next_start = serial.next_start.unwrap_or(start);
            let Some(child) = serial.children.get(serial.cursor).copied() else {
                self.leave(id, next_start);
                return;
            };
            if next_start > horizon {
                return;
            }

            if self.tree.phase(child) == Phase::Unstarted {
                self.enter_guarded(child, next_start, horizon);
            }
            self.poll_guarded(child, horizon);
            if self.tree.phase(child) != Phase::Finished {
                return;
            }

            let end = self.tree.end_time(child).unwrap_or(horizon);
            if let StateKind::Serial(serial) = &mut self.tree.node_mut(id).kind {
                serial.cursor += 1;
                serial.next_start = Some(end);
            }
        }
    }

    fn poll_parallel(&mut self, id: StateId, start: f64, horizon: f64) {
        let StateKind::Parallel(parallel) = &self.tree.node(id).kind else {
            return;
        };
        let children = parallel.children.clone();
        let blocking = parallel.blocking_children();

        for child in children {
            if !self.is_active(id) {
                return;
            }
            if self.tree.phase(child) == Phase::Unstarted {
                self.enter_guarded(child, start, horizon);
            }
            self.poll_guarded(child, horizon);
        }

        if !self.is_active(id) {
            return;
        }
        let mut end: Option<f64> = None;
        for child in &blocking {
            if self.tree.phase(*child) != Phase::Finished {
                return;
            }
            let child_end = self.tree.end_time(*child).unwrap_or(horizon);
            end = Some(end.map_or(child_end, |e| e.max(child_end)));
        }
        // Remaining children are forced out at the same time
        self.leave(id, end.unwrap_or(start));
    }

    fn poll_loop(&mut self, id: StateId, start: f64, horizon: f64) -> Result<()> {
        let mut iterations = 0;
        while self.is_active(id) && self.faults.is_empty() {
            let StateKind::Loop(lp) = &self.tree.node(id).kind else {
                return Ok(());
            };
            let next_start = lp.next_start.unwrap_or(start);
            let Some(body) = lp.body else {
                self.leave(id, next_start);
                return Ok(());
            };

            if !lp.in_iteration {
                if lp.break_requested {
                    self.leave(id, next_start);
                    return Ok(());
                }
                if next_start > horizon {
                    return Ok(());
                }
                let i = lp.i;
                let (proceed, current) = match (&lp.items, &lp.condition) {
                    (Some(_), _) => match lp.item(i) {
                        Some(item) => (true, item),
                        None => (false, Value::Null),
                    },
                    (None, Some(condition)) => (condition.eval(&self.tree)?.truthy(), Value::Null),
                    (None, None) => (true, Value::Null),
                };
                if !proceed {
                    self.leave(id, next_start);
                    return Ok(());
                }
                if iterations >= self.config.max_iterations_per_tick {
                    log::warn!(
                        "{} hit {} iterations in one tick, continuing next tick",
                        self.tree.name(id),
                        iterations
                    );
                    return Ok(());
                }
                iterations += 1;

                self.tree.reset_subtree(body);
                if let StateKind::Loop(lp) = &mut self.tree.node_mut(id).kind {
                    lp.in_iteration = true;
                    lp.next_start = Some(next_start);
                    if lp.items.is_some() {
                        lp.current = current;
                    }
                }
                log::trace!("{} iteration {}", self.tree.name(id), i);
                self.enter_guarded(body, next_start, horizon);
            }

            self.poll_guarded(body, horizon);
            if !self.is_active(id) || self.tree.phase(body) != Phase::Finished {
                return Ok(());
            }

            let end = self.tree.end_time(body).unwrap_or(horizon);
            if let StateKind::Loop(lp) = &mut self.tree.node_mut(id).kind {
                lp.in_iteration = false;
                lp.i += 1;
                lp.next_start = Some(end);
            }
        }
        Ok(())
    }

    /// Finish a state at `at`, forcing out any active children first
    ///
    /// The end time is clamped into `[start, deadline]`. Leaving a state that
    /// is not active does nothing.
    fn leave(&mut self, id: StateId, at: f64) {
        if !self.is_active(id) {
            return;
        }
        let core = &self.tree.node(id).core;
        let at = core.deadline().map_or(at, |deadline| at.min(deadline));
        let at = core.start_time.map_or(at, |start| at.max(start));

        for child in self.tree.node(id).kind.children() {
            if self.is_active(child) {
                self.leave(child, at);
            }
        }

        match &mut self.tree.node_mut(id).kind {
            StateKind::Capture(_) | StateKind::KeyRecord(_) => {
                self.dispatcher.remove_owner(id);
            }
            StateKind::Stimulus(stimulus) => {
                let offset = self.presenter.hide(id, at).unwrap_or(at);
                stimulus.disappear_time = Some(offset);
            }
            _ => {}
        }

        let node = self.tree.node_mut(id);
        node.core.end_time = Some(at);
        node.core.phase = Phase::Finished;
        log::debug!("Leave {} at {:.6}s", node.core.name, at);

        let logged = node.core.save_log
            && !matches!(node.kind, StateKind::Log(_))
            && (self.config.log_composites || !node.kind.is_composite());
        if logged {
            let record = self.tree.exit_record(id);
            self.sink.record(record);
        }
    }

    fn eval_map(&self, refs: &BTreeMap<String, Ref>) -> Result<BTreeMap<String, Value>> {
        refs.iter()
            .map(|(name, value)| Ok((name.clone(), value.eval(&self.tree)?)))
            .collect()
    }

    /// Take a Record sample and log it if anything changed
    fn sample(&mut self, id: StateId, time: f64) -> Result<()> {
        let StateKind::Record(record) = &self.tree.node(id).kind else {
            return Ok(());
        };
        let values = self.eval_map(&record.track.clone())?;
        let changed = match &mut self.tree.node_mut(id).kind {
            StateKind::Record(record) => record.observe(values.clone()),
            _ => false,
        };
        if changed {
            let mut values = values;
            values.insert("timestamp".to_string(), Value::Float(time));
            let record = LogRecord {
                state: self.tree.name(id).to_string(),
                kind: "Record",
                activation: self.tree.activation(id),
                time,
                values,
            };
            self.sink.record(record);
        }
        Ok(())
    }

    /// Evaluate a capture state's accepted and correct sets
    fn capture_sets(&self, id: StateId) -> Result<(Value, Value)> {
        let StateKind::Capture(capture) = &self.tree.node(id).kind else {
            return Ok((Value::Null, Value::Null));
        };
        let accepted = match &capture.accept {
            Some(accept) => accept.eval(&self.tree)?,
            None => Value::Null,
        };
        let correct = match &capture.correct {
            Some(correct) => correct.eval(&self.tree)?,
            None => Value::Null,
        };
        Ok((accepted, correct))
    }

    fn deliver(&mut self, owner: StateId, event: &InputEvent) -> Result<()> {
        if !self.is_active(owner) {
            return Ok(());
        }
        let start = self.tree.start_time(owner).unwrap_or(event.time);
        if event.time < start {
            log::trace!(
                "{} ignoring event at {:.6}s from before its start",
                self.tree.name(owner),
                event.time
            );
            return Ok(());
        }

        if matches!(self.tree.node(owner).kind, StateKind::Capture(_)) {
            let (accepted, correct) = self.capture_sets(owner)?;
            let node = self.tree.node_mut(owner);
            let deadline = node.core.deadline();
            let consumed = match &mut node.kind {
                StateKind::Capture(capture) => {
                    capture.set_sets(accepted, correct);
                    capture.respond(event, deadline, &self.config)?
                }
                _ => false,
            };
            if consumed {
                log::debug!("{} accepted {} at {:.6}s", node.core.name, event.kind, event.time);
                self.leave(owner, event.time);
            }
            return Ok(());
        }

        let node = self.tree.node_mut(owner);
        let values = match &mut node.kind {
            StateKind::KeyRecord(recorder) => recorder.observe(event, &self.config),
            _ => None,
        };
        if let Some(values) = values {
            let record = LogRecord {
                state: node.core.name.clone(),
                kind: "KeyRecord",
                activation: node.core.activation,
                time: event.time,
                values,
            };
            self.sink.record(record);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("states", &self.tree.len())
            .field("root", &self.root)
            .field("ticks", &self.ticks)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
