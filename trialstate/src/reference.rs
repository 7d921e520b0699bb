//! Lazy references
//!
//! A [`Ref`] is a small expression graph built before the run and evaluated
//! whenever a state consults it. Operands are literals, state attributes or
//! experiment variables; composition uses the usual arithmetic, comparison,
//! logical and membership operators. [`Ref::jitter`] and [`Ref::shuffle`]
//! draw fresh random values on every evaluation.
//!
//! ```
//! use trialstate::Ref;
//!
//! let total = Ref::from(1) + 2.5;
//! let check = total.clone().gt(3.0).and(Ref::from("K").is_in(vec!["J", "K"]));
//! # let _ = check;
//! ```

use crate::types::{EngineError, Result, StateId, Value};
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::fmt;
use std::ops;

/// Where references read attributes and variables from
pub trait Scope {
    /// Current value of a state attribute (last known value after exit)
    fn attribute(&self, state: StateId, name: &str) -> Result<Value>;

    /// Current value of an experiment variable
    fn variable(&self, name: &str) -> Result<Value>;

    /// Uniform sample in `[0, 1)`
    ///
    /// Defaults to the thread-local generator; the state tree overrides this
    /// with its own (optionally seeded) generator.
    fn random(&self) -> f64 {
        rand::rng().random()
    }

    /// Put `items` in a random order
    fn shuffle(&self, items: &mut [Value]) {
        items.shuffle(&mut rand::rng());
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::In => "in",
        }
    }
}

/// A deferred, re-evaluatable expression
#[derive(Debug, Clone)]
pub enum Ref {
    Literal(Value),
    Attr { state: StateId, name: String },
    Var(String),
    Unary(UnaryOp, Box<Ref>),
    Binary(BinaryOp, Box<Ref>, Box<Ref>),
    /// `low + U[0, 1) * range`, drawn at every evaluation
    Jitter(Box<Ref>, Box<Ref>),
    /// A freshly shuffled copy of a list
    Shuffle(Box<Ref>),
}

impl Ref {
    pub fn literal(value: impl Into<Value>) -> Self {
        Ref::Literal(value.into())
    }

    pub fn attr(state: StateId, name: impl Into<String>) -> Self {
        Ref::Attr {
            state,
            name: name.into(),
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Ref::Var(name.into())
    }

    fn binary(self, op: BinaryOp, rhs: impl Into<Ref>) -> Self {
        Ref::Binary(op, Box::new(self), Box::new(rhs.into()))
    }

    pub fn equals(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::Or, rhs)
    }

    /// Membership test: `self` is an element of (or substring of) `container`
    pub fn is_in(self, container: impl Into<Ref>) -> Self {
        self.binary(BinaryOp::In, container)
    }

    /// A random value in `[low, low + range)`, e.g. a jittered inter-trial interval
    pub fn jitter(low: impl Into<Ref>, range: impl Into<Ref>) -> Self {
        Ref::Jitter(Box::new(low.into()), Box::new(range.into()))
    }

    /// The list `items` in a new random order each time it is read
    pub fn shuffle(items: impl Into<Ref>) -> Self {
        Ref::Shuffle(Box::new(items.into()))
    }

    /// Evaluate against the current attributes and variables
    ///
    /// Evaluation walks the graph every time it is called; nothing is cached
    /// and nothing is mutated apart from the scope's random generator.
    pub fn eval(&self, scope: &dyn Scope) -> Result<Value> {
        match self {
            Ref::Literal(value) => Ok(value.clone()),
            Ref::Attr { state, name } => scope.attribute(*state, name),
            Ref::Var(name) => scope.variable(name),
            Ref::Unary(op, operand) => apply_unary(*op, operand.eval(scope)?),
            Ref::Binary(BinaryOp::And, lhs, rhs) => {
                if !lhs.eval(scope)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(rhs.eval(scope)?.truthy()))
            }
            Ref::Binary(BinaryOp::Or, lhs, rhs) => {
                if lhs.eval(scope)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(rhs.eval(scope)?.truthy()))
            }
            Ref::Binary(op, lhs, rhs) => {
                let left = lhs.eval(scope)?;
                let right = rhs.eval(scope)?;
                apply_binary(*op, left, right)
            }
            Ref::Jitter(low, range) => {
                let low = low.eval(scope)?.expect_f64()?;
                let range = range.eval(scope)?.expect_f64()?;
                Ok(Value::Float(low + scope.random() * range))
            }
            Ref::Shuffle(items) => match items.eval(scope)? {
                Value::List(mut items) => {
                    scope.shuffle(&mut items);
                    Ok(Value::List(items))
                }
                other => Err(EngineError::UnexpectedType {
                    expected: "list",
                    found: other.type_name(),
                }),
            },
        }
    }
}

fn apply_unary(op: UnaryOp, operand: Value) -> Result<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Int(v)) => v
            .checked_neg()
            .map(Value::Int)
            .ok_or(EngineError::Overflow("-")),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Neg, other) => Err(EngineError::UnaryTypeMismatch {
            op: "-",
            operand: other.type_name(),
        }),
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EngineError {
    EngineError::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => arithmetic(op, &a, &b),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right).ok_or_else(|| mismatch(op, &left, &right))?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => match (&left, &right) {
            (_, Value::List(items)) => Ok(Value::Bool(items.iter().any(|item| loosely_equal(&left, item)))),
            (Value::Str(needle), Value::Str(haystack)) => Ok(Value::Bool(haystack.contains(needle.as_str()))),
            _ => Err(mismatch(op, &left, &right)),
        },
        // `Ref::eval` short-circuits these before reaching here.
        BinaryOp::And => Ok(Value::Bool(left.truthy() && right.truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.truthy() || right.truthy())),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let checked = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Rem if b == 0 => return Err(EngineError::DivisionByZero),
            BinaryOp::Rem => a.checked_rem_euclid(b),
            BinaryOp::Div if b == 0 => return Err(EngineError::DivisionByZero),
            _ => return Ok(Value::Float(a as f64 / b as f64)),
        };
        return checked.map(Value::Int).ok_or(EngineError::Overflow(op.symbol()));
    }

    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch(op, left, right)),
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => Err(EngineError::DivisionByZero),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        _ => Ok(Value::Float(a.rem_euclid(b))),
    }
}

/// Equality that treats `1` and `1.0` as equal
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

impl From<Value> for Ref {
    fn from(value: Value) -> Self {
        Ref::Literal(value)
    }
}

macro_rules! literal_conversion {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Ref {
                fn from(value: $ty) -> Self {
                    Ref::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_conversion!(bool, i32, i64, f64, &str, String);

impl<T: Into<Value>> From<Vec<T>> for Ref {
    fn from(items: Vec<T>) -> Self {
        Ref::Literal(Value::from(items))
    }
}

macro_rules! arithmetic_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Ref>> ops::$trait<R> for Ref {
            type Output = Ref;

            fn $method(self, rhs: R) -> Ref {
                self.binary($op, rhs)
            }
        }
    };
}

arithmetic_operator!(Add, add, BinaryOp::Add);
arithmetic_operator!(Sub, sub, BinaryOp::Sub);
arithmetic_operator!(Mul, mul, BinaryOp::Mul);
arithmetic_operator!(Div, div, BinaryOp::Div);
arithmetic_operator!(Rem, rem, BinaryOp::Rem);

impl ops::Neg for Ref {
    type Output = Ref;

    fn neg(self) -> Ref {
        Ref::Unary(UnaryOp::Neg, Box::new(self))
    }
}

impl ops::Not for Ref {
    type Output = Ref;

    fn not(self) -> Ref {
        Ref::Unary(UnaryOp::Not, Box::new(self))
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Literal(value) => write!(f, "{}", value),
            Ref::Attr { state, name } => write!(f, "{}.{}", state, name),
            Ref::Var(name) => write!(f, "${}", name),
            Ref::Unary(UnaryOp::Neg, operand) => write!(f, "-({})", operand),
            Ref::Unary(UnaryOp::Not, operand) => write!(f, "!({})", operand),
            Ref::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Ref::Jitter(low, range) => write!(f, "jitter({}, {})", low, range),
            Ref::Shuffle(items) => write!(f, "shuffle({})", items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// Scope with fixed attributes that counts attribute reads
    #[derive(Default)]
    struct FixedScope {
        attrs: HashMap<(StateId, String), Value>,
        vars: HashMap<String, Value>,
        reads: Cell<usize>,
    }

    impl Scope for FixedScope {
        fn attribute(&self, state: StateId, name: &str) -> Result<Value> {
            self.reads.set(self.reads.get() + 1);
            self.attrs
                .get(&(state, name.to_string()))
                .cloned()
                .ok_or_else(|| EngineError::UnknownAttribute {
                    state: state.to_string(),
                    attr: name.to_string(),
                })
        }

        fn variable(&self, name: &str) -> Result<Value> {
            self.vars
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))
        }
    }

    #[test]
    fn test_literal_arithmetic_and_precedence() {
        let scope = FixedScope::default();
        let expr = Ref::from(2) + Ref::from(3) * 4;
        assert_eq!(expr.eval(&scope).unwrap(), Value::Int(14));

        let expr = (Ref::from(1) + 0.5) / 2;
        assert_eq!(expr.eval(&scope).unwrap(), Value::Float(0.75));
    }

    #[test]
    fn test_attribute_sum_is_read_at_eval_time() {
        let mut scope = FixedScope::default();
        let kp = StateId(4);
        scope.attrs.insert((kp, "rt".to_string()), Value::Float(0.42));

        let expr = kp.attr("rt") + 1.0;
        assert_eq!(expr.eval(&scope).unwrap(), Value::Float(1.42));
        // Re-reading gives the same answer and reads the attribute again
        assert_eq!(expr.eval(&scope).unwrap(), Value::Float(1.42));
        assert_eq!(scope.reads.get(), 2);

        scope.attrs.insert((kp, "rt".to_string()), Value::Float(0.5));
        assert_eq!(expr.eval(&scope).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_comparisons_and_membership() {
        let scope = FixedScope::default();
        assert_eq!(Ref::from(2).lt(3).eval(&scope).unwrap(), Value::Bool(true));
        assert_eq!(Ref::from(2).equals(2.0).eval(&scope).unwrap(), Value::Bool(true));
        assert_eq!(Ref::from("K").not_equals("J").eval(&scope).unwrap(), Value::Bool(true));
        assert_eq!(Ref::from("a").ge("b").eval(&scope).unwrap(), Value::Bool(false));
        assert_eq!(
            Ref::from("K").is_in(vec!["J", "K"]).eval(&scope).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(Ref::from("ell").is_in("hello").eval(&scope).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let scope = FixedScope::default();
        let missing = Ref::var("missing");
        // The right operand would fail, but it is never evaluated
        let expr = Ref::from(false).and(missing.clone());
        assert_eq!(expr.eval(&scope).unwrap(), Value::Bool(false));
        let expr = Ref::from(true).or(missing.clone());
        assert_eq!(expr.eval(&scope).unwrap(), Value::Bool(true));
        assert!(Ref::from(true).and(missing).eval(&scope).is_err());
    }

    #[test]
    fn test_type_errors() {
        let scope = FixedScope::default();
        let err = (Ref::from("a") - 1).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { op: "-", .. }));

        let err = (Ref::from(1) / 0).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::DivisionByZero));

        let err = (-Ref::from("a")).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::UnaryTypeMismatch { .. }));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let scope = FixedScope::default();
        let err = (Ref::from(i64::MAX) + 1).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::Overflow("+")));

        let err = (Ref::from(i64::MIN) % -1).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::Overflow("%")));

        let err = (Ref::from(i64::MIN) * 2).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::Overflow("*")));

        let err = (-Ref::from(i64::MIN)).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::Overflow("-")));

        // In range results stay integers
        assert_eq!((Ref::from(-7) % 3).eval(&scope).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_concatenation_and_negation() {
        let scope = FixedScope::default();
        assert_eq!((Ref::from("ab") + "cd").eval(&scope).unwrap(), Value::from("abcd"));
        assert_eq!(
            (Ref::from(vec![1]) + vec![2]).eval(&scope).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!((!Ref::from(0)).eval(&scope).unwrap(), Value::Bool(true));
        assert_eq!((-Ref::from(1.5)).eval(&scope).unwrap(), Value::Float(-1.5));
    }

    #[test]
    fn test_jitter_is_drawn_on_every_evaluation() {
        let mut scope = FixedScope::default();
        scope.vars.insert("iti".to_string(), Value::Float(0.5));
        let delay = Ref::jitter(Ref::var("iti"), 0.25);

        let samples: Vec<f64> = (0..200)
            .map(|_| delay.eval(&scope).unwrap().as_f64().unwrap())
            .collect();
        assert!(samples.iter().all(|v| (0.5..0.75).contains(v)));
        assert!(samples.iter().any(|v| *v != samples[0]));

        let err = Ref::jitter("soon", 1).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedType { expected: "number", .. }));
    }

    #[test]
    fn test_shuffle_keeps_the_items() {
        let scope = FixedScope::default();
        let order = Ref::shuffle((0..20).collect::<Vec<i64>>());

        let Value::List(mut items) = order.eval(&scope).unwrap() else {
            panic!("shuffle should produce a list");
        };
        items.sort_by_key(|v| match v {
            Value::Int(i) => *i,
            _ => i64::MAX,
        });
        assert_eq!(items, (0..20).map(Value::Int).collect::<Vec<_>>());

        let draws: Vec<Value> = (0..10).map(|_| order.eval(&scope).unwrap()).collect();
        assert!(draws.iter().any(|draw| *draw != draws[0]));

        let err = Ref::shuffle(3).eval(&scope).unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedType { expected: "list", .. }));
    }

    #[test]
    fn test_display() {
        let expr = StateId(2).attr("i").lt(3).and(Ref::var("go"));
        assert_eq!(format!("{}", expr), "((#2.i < 3) && $go)");
        assert_eq!(format!("{}", Ref::jitter(1, 0.5)), "jitter(1, 0.500000)");
    }
}
