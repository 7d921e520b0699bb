//! Core types for the trialstate engine
//!
//! This module defines the values that flow through references, attributes and
//! log records, the handle used to address states in the arena, and the error
//! taxonomy shared by the builder and the scheduler.

use crate::reference::Ref;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Handle to a state inside an experiment's state arena
///
/// Handles are plain indices: they never own the state they point to, which is
/// what lets a child remember its parent without keeping it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub(crate) usize);

impl StateId {
    /// Position of the state in the arena
    pub fn index(self) -> usize {
        self.0
    }

    /// Lazy reference to one of this state's attributes
    pub fn attr(self, name: impl Into<String>) -> Ref {
        Ref::attr(self, name)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dynamic value carried by references, attributes, variables and log records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value (e.g. no response recorded yet)
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Numeric view of the value (ints widen to f64)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by conditions and logical operators
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Numeric value or a typed error naming what was expected
    pub fn expect_f64(&self) -> Result<f64> {
        self.as_f64().ok_or(EngineError::UnexpectedType {
            expected: "number",
            found: self.type_name(),
        })
    }

    /// Optional timestamp: `None` for Null, seconds otherwise
    pub(crate) fn from_time(time: Option<f64>) -> Value {
        time.map(Value::Float).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:.6}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Lifecycle phase of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unstarted,
    Active,
    Finished,
}

/// A runtime error captured at the boundary of the state that raised it
#[derive(Debug)]
pub struct StateFault {
    /// The state whose enter, poll or callback failed
    pub state: StateId,
    /// Its name at the time of the failure
    pub state_name: String,
    /// Clock time at which the failure was observed
    pub time: f64,
    pub error: Box<EngineError>,
}

impl fmt::Display for StateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` at {:.6}s: {}", self.state_name, self.time, self.error)
    }
}

/// Every fault collected during one tick, delivered together
#[derive(Debug)]
pub struct FaultReport {
    pub faults: Vec<StateFault>,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.faults.as_slice() {
            [] => write!(f, "no faults"),
            [only] => write!(f, "{}", only),
            [first, rest @ ..] => write!(f, "{} (and {} more)", first, rest.len()),
        }
    }
}

/// Errors raised while authoring or running an experiment
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{keyword} must directly follow an If block")]
    BranchWithoutIf { keyword: &'static str },

    #[error("If block `{0}` already has an Else branch")]
    BranchAfterElse(String),

    #[error("Done target `{0}` is not a Loop")]
    NotALoop(String),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Duplicate state name: {0}")]
    DuplicateName(String),

    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("Expression error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Cannot apply `{op}` to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("Cannot apply `{op}` to {operand}")]
    UnaryTypeMismatch { op: &'static str, operand: &'static str },

    #[error("Expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in `{0}`")]
    Overflow(&'static str),

    #[error("State `{state}` has no attribute `{attr}`")]
    UnknownAttribute { state: String, attr: String },

    #[error("Variable `{0}` is not set")]
    UnknownVariable(String),

    #[error("Function in `{state}` failed: {message}")]
    FunctionFailed { state: String, message: String },

    #[error("Clock regression in `{state}`: now {now:.6}s is before {reference:.6}s")]
    ClockRegression {
        state: String,
        reference: f64,
        now: f64,
    },

    #[error("State `{0}` entered twice without a reset")]
    Reentered(String),

    #[error("Run terminated: {0}")]
    Faulted(FaultReport),

    #[error("Tick limit of {0} reached before the experiment finished")]
    TickLimit(u64),

    #[error("Experiment has already finished")]
    RunFinished,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int(42).as_f64(), Some(42.0));
        assert_eq!(Value::Float(0.25).as_f64(), Some(0.25));
        assert_eq!(Value::from("K").as_str(), Some("K"));
        assert_eq!(Value::Null.as_f64(), None);
        assert!(Value::from(vec!["J", "K"]).truthy());
        assert!(!Value::Str(String::new()).truthy());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Int(3)), "3");
        assert_eq!(format!("{}", Value::Float(0.42)), "0.420000");
        assert_eq!(format!("{}", Value::from(vec!["J", "K"])), "[\"J\", \"K\"]");
    }

    #[test]
    fn test_expect_f64_reports_type() {
        let err = Value::from("x").expect_f64().unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnexpectedType { expected: "number", found: "string" }
        ));
    }

    #[test]
    fn test_fault_report_display() {
        let fault = |name: &str| StateFault {
            state: StateId(1),
            state_name: name.to_string(),
            time: 0.5,
            error: Box::new(EngineError::DivisionByZero),
        };
        let report = FaultReport { faults: vec![fault("a"), fault("b")] };
        assert_eq!(format!("{}", report), "`a` at 0.500000s: Division by zero (and 1 more)");
    }
}
