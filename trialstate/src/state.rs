//! State arena and the attributes every state shares
//!
//! States live in a flat arena owned by the experiment and are addressed by
//! [`StateId`]. A composite holds the ids of its children; a child holds the
//! id of its parent. Both links are fixed when the tree is built.

use crate::reference::{Ref, Scope};
use crate::sink::LogRecord;
use crate::states::StateKind;
use crate::types::{EngineError, Phase, Result, StateId, Value};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// Requested lifespan of a state
///
/// With neither bound set the state runs until it leaves on its own (or its
/// parent forces it out). `duration` is evaluated once on entry; `until` is
/// evaluated on every poll and may be a condition (`true` leaves) or a clock
/// deadline in seconds.
#[derive(Debug, Clone, Default)]
pub struct Lifespan {
    pub duration: Option<Ref>,
    pub until: Option<Ref>,
}

impl Lifespan {
    pub fn indefinite() -> Self {
        Self::default()
    }

    pub fn fixed(duration: impl Into<Ref>) -> Self {
        Self {
            duration: Some(duration.into()),
            until: None,
        }
    }

    pub fn until(until: impl Into<Ref>) -> Self {
        Self {
            duration: None,
            until: Some(until.into()),
        }
    }

    pub fn is_indefinite(&self) -> bool {
        self.duration.is_none() && self.until.is_none()
    }
}

/// Fields common to every state
#[derive(Debug)]
pub(crate) struct StateCore {
    pub name: String,
    pub parent: Option<StateId>,
    pub phase: Phase,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub lifespan: Lifespan,
    /// `start + duration` (or `base_time + duration` for capture states)
    pub duration_deadline: Option<f64>,
    /// Last numeric value of `until`
    pub until_deadline: Option<f64>,
    pub activation: u32,
    pub save_log: bool,
}

impl StateCore {
    fn new(name: String, parent: Option<StateId>) -> Self {
        Self {
            name,
            parent,
            phase: Phase::Unstarted,
            start_time: None,
            end_time: None,
            lifespan: Lifespan::default(),
            duration_deadline: None,
            until_deadline: None,
            activation: 0,
            save_log: true,
        }
    }

    /// Earliest active deadline, if any
    pub fn deadline(&self) -> Option<f64> {
        match (self.duration_deadline, self.until_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateNode {
    pub core: StateCore,
    pub kind: StateKind,
}

/// Flat storage for every state of an experiment, plus experiment variables
#[derive(Debug)]
pub struct StateTree {
    nodes: Vec<StateNode>,
    names: HashMap<String, StateId>,
    pub(crate) vars: BTreeMap<String, Value>,
    /// Source for jittered and shuffled references
    rng: RefCell<SmallRng>,
}

impl StateTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            names: HashMap::new(),
            vars: BTreeMap::new(),
            rng: RefCell::new(SmallRng::from_os_rng()),
        }
    }

    /// Replace the random generator with one seeded for a reproducible run
    pub(crate) fn reseed(&mut self, seed: u64) {
        self.rng = RefCell::new(SmallRng::seed_from_u64(seed));
    }

    /// A tree holding only its root state
    pub(crate) fn with_root(name: &str, kind: StateKind) -> (Self, StateId) {
        let mut tree = Self::new();
        let root = StateId(0);
        tree.names.insert(name.to_string(), root);
        tree.nodes.push(StateNode {
            core: StateCore::new(name.to_string(), None),
            kind,
        });
        (tree, root)
    }

    /// Add a state; unnamed states are called `<Kind>_<index>`
    pub(crate) fn insert(
        &mut self,
        parent: Option<StateId>,
        name: Option<String>,
        kind: StateKind,
    ) -> Result<StateId> {
        let id = StateId(self.nodes.len());
        let name = name.unwrap_or_else(|| format!("{}_{}", kind.label(), id.0));
        if self.names.contains_key(&name) {
            return Err(EngineError::DuplicateName(name));
        }
        self.names.insert(name.clone(), id);
        self.nodes.push(StateNode {
            core: StateCore::new(name, parent),
            kind,
        });
        Ok(id)
    }

    /// Rename a state before the run
    pub(crate) fn rename(&mut self, id: StateId, name: &str) -> Result<()> {
        let current = self.node(id).core.name.clone();
        if current == name {
            return Ok(());
        }
        if self.names.contains_key(name) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        self.names.remove(&current);
        self.names.insert(name.to_string(), id);
        self.node_mut(id).core.name = name.to_string();
        Ok(())
    }

    pub(crate) fn node(&self, id: StateId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: StateId) -> &mut StateNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn contains(&self, id: StateId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Find a state by name
    pub fn lookup(&self, name: &str) -> Option<StateId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, id: StateId) -> &str {
        &self.node(id).core.name
    }

    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.node(id).core.parent
    }

    pub fn phase(&self, id: StateId) -> Phase {
        self.node(id).core.phase
    }

    pub fn start_time(&self, id: StateId) -> Option<f64> {
        self.node(id).core.start_time
    }

    pub fn end_time(&self, id: StateId) -> Option<f64> {
        self.node(id).core.end_time
    }

    pub fn activation(&self, id: StateId) -> u32 {
        self.node(id).core.activation
    }

    /// Kind label of a state, e.g. `"KeyPress"`
    pub fn kind(&self, id: StateId) -> &'static str {
        self.node(id).kind.label()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current value of an experiment variable, if set
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// `id` and every state below it, parents before children
    pub(crate) fn subtree(&self, id: StateId) -> Vec<StateId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children = self.node(next).kind.children();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Return a finished subtree to Unstarted so it can run again
    ///
    /// Per-run fields are cleared; the activation counter is kept and bumped on
    /// the next entry, so records from different iterations stay distinct.
    pub(crate) fn reset_subtree(&mut self, id: StateId) {
        for state in self.subtree(id) {
            let node = self.node_mut(state);
            node.core.phase = Phase::Unstarted;
            node.core.start_time = None;
            node.core.end_time = None;
            node.core.duration_deadline = None;
            node.core.until_deadline = None;
            node.kind.reset();
        }
    }

    /// Attribute lookup shared by references and log records
    pub fn attribute(&self, id: StateId, name: &str) -> Result<Value> {
        if !self.contains(id) {
            return Err(EngineError::UnknownState(id.to_string()));
        }
        let node = self.node(id);
        let core = &node.core;
        let value = match name {
            "name" => Value::Str(core.name.clone()),
            "start_time" => Value::from_time(core.start_time),
            "end_time" => Value::from_time(core.end_time),
            "active" => Value::Bool(core.phase == Phase::Active),
            "finished" => Value::Bool(core.phase == Phase::Finished),
            "activation" => Value::Int(core.activation as i64),
            "elapsed" => match (core.start_time, core.end_time) {
                (Some(start), Some(end)) => Value::Float(end - start),
                _ => Value::Null,
            },
            _ => node.kind.attribute(name).ok_or_else(|| EngineError::UnknownAttribute {
                state: core.name.clone(),
                attr: name.to_string(),
            })?,
        };
        Ok(value)
    }

    /// Record handed to the log sink when a state exits
    pub(crate) fn exit_record(&self, id: StateId) -> LogRecord {
        let node = self.node(id);
        let mut values = BTreeMap::new();
        values.insert("start_time".to_string(), Value::from_time(node.core.start_time));
        values.insert("end_time".to_string(), Value::from_time(node.core.end_time));
        for attr in node.kind.log_attrs() {
            let value = node.kind.attribute(attr).unwrap_or_default();
            values.insert(attr.to_string(), value);
        }
        LogRecord {
            state: node.core.name.clone(),
            kind: node.kind.label(),
            activation: node.core.activation,
            time: node.core.end_time.unwrap_or_default(),
            values,
        }
    }
}

impl Scope for StateTree {
    fn attribute(&self, state: StateId, name: &str) -> Result<Value> {
        StateTree::attribute(self, state, name)
    }

    fn variable(&self, name: &str) -> Result<Value> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))
    }

    fn random(&self) -> f64 {
        self.rng.borrow_mut().random()
    }

    fn shuffle(&self, items: &mut [Value]) {
        items.shuffle(&mut *self.rng.borrow_mut());
    }
}
