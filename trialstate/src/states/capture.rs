//! Response capture: KeyPress, PointerPress and KeyRecord
//!
//! A capture state subscribes to its input channel on entry and records the
//! first qualifying event:
//!
//! - `pressed`: which key (or button) was accepted, `""` if none
//! - `press_time`: event timestamp, Null if none
//! - `rt`: `press_time - base_time`, Null if none
//! - `correct`: whether `pressed` is in the correct-response set
//!
//! `base_time` defaults to the state's own start time and is fixed on entry,
//! in the same step that subscribes to the channel.

use crate::config::EngineConfig;
use crate::event::{EventKind, InputEvent};
use crate::reference::Ref;
use crate::state::Lifespan;
use crate::types::{EngineError, Result, Value};
use std::collections::BTreeMap;

/// Input channel a capture state listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Key,
    Pointer,
}

/// Runtime data of KeyPress and PointerPress states
#[derive(Debug, Clone)]
pub(crate) struct Capture {
    pub channel: Channel,
    /// Accepted keys/buttons; None (or Null) accepts anything
    pub accept: Option<Ref>,
    pub correct: Option<Ref>,
    pub base_time_src: Option<Ref>,
    accepted: Value,
    correct_set: Value,
    pub base_time: Option<f64>,
    pressed: String,
    press_time: Option<f64>,
    rt: Option<f64>,
    is_correct: bool,
    position: Option<(f64, f64)>,
}

impl Capture {
    fn new(channel: Channel, accept: Option<Ref>, correct: Option<Ref>, base_time_src: Option<Ref>) -> Self {
        Self {
            channel,
            accept,
            correct,
            base_time_src,
            accepted: Value::Null,
            correct_set: Value::Null,
            base_time: None,
            pressed: String::new(),
            press_time: None,
            rt: None,
            is_correct: false,
            position: None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self.channel {
            Channel::Key => "KeyPress",
            Channel::Pointer => "PointerPress",
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self.channel {
            Channel::Key => EventKind::KeyDown,
            Channel::Pointer => EventKind::PointerDown,
        }
    }

    /// Restore the "no response" defaults
    pub fn reset(&mut self) {
        self.accepted = Value::Null;
        self.correct_set = Value::Null;
        self.base_time = None;
        self.pressed.clear();
        self.press_time = None;
        self.rt = None;
        self.is_correct = false;
        self.position = None;
    }

    /// Remember the latest evaluated accepted/correct sets for logging
    pub fn set_sets(&mut self, accepted: Value, correct: Value) {
        self.accepted = accepted;
        self.correct_set = correct;
    }

    pub fn has_response(&self) -> bool {
        self.press_time.is_some()
    }

    /// Consider one event; records it and returns true if it qualifies
    ///
    /// Events stamped at or after `deadline` lose the race against the
    /// timeout and are ignored, as are events outside the accepted set.
    pub fn respond(&mut self, event: &InputEvent, deadline: Option<f64>, config: &EngineConfig) -> Result<bool> {
        if self.has_response() {
            return Ok(false);
        }
        if deadline.is_some_and(|d| event.time >= d) {
            log::warn!(
                "{} ignoring event at {:.6}s past its deadline {:.6}s",
                self.label(),
                event.time,
                deadline.unwrap_or_default()
            );
            return Ok(false);
        }
        let raw = match self.channel {
            Channel::Key => event.key_name(),
            Channel::Pointer => event.button(),
        };
        let Some(raw) = raw else {
            return Ok(false);
        };
        let name = config.normalize_key(raw);

        if let Some(accepted) = member_set(&self.accepted, config)? {
            if !accepted.contains(&name) {
                log::trace!("{} ignoring `{}`", self.label(), name);
                return Ok(false);
            }
        }

        let base_time = self.base_time.unwrap_or(event.time);
        self.is_correct = member_set(&self.correct_set, config)?
            .is_some_and(|correct| correct.contains(&name));
        self.rt = Some(event.time - base_time);
        self.press_time = Some(event.time);
        self.position = event.position();
        self.pressed = name;
        Ok(true)
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        let value = match name {
            "keys" if self.channel == Channel::Key => self.accepted.clone(),
            "buttons" if self.channel == Channel::Pointer => self.accepted.clone(),
            "correct_resp" => self.correct_set.clone(),
            "base_time" => Value::from_time(self.base_time),
            "pressed" => Value::Str(self.pressed.clone()),
            "press_time" => Value::from_time(self.press_time),
            "rt" => Value::from_time(self.rt),
            "correct" => Value::Bool(self.is_correct),
            "position" if self.channel == Channel::Pointer => match self.position {
                Some((x, y)) => Value::List(vec![Value::Float(x), Value::Float(y)]),
                None => Value::Null,
            },
            _ => return None,
        };
        Some(value)
    }

    pub fn log_attrs(&self) -> &'static [&'static str] {
        match self.channel {
            Channel::Key => &["keys", "correct_resp", "base_time", "pressed", "press_time", "correct", "rt"],
            Channel::Pointer => &[
                "buttons",
                "correct_resp",
                "base_time",
                "pressed",
                "press_time",
                "correct",
                "rt",
                "position",
            ],
        }
    }
}

/// Interpret a key/button set value; `None` means unbounded
///
/// Accepts a single name, a list of names, or Null. A Null inside a list also
/// makes the set unbounded.
pub(crate) fn member_set(value: &Value, config: &EngineConfig) -> Result<Option<Vec<String>>> {
    match value {
        Value::Null => Ok(None),
        Value::Str(name) => Ok(Some(vec![config.normalize_key(name)])),
        Value::List(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => return Ok(None),
                    Value::Str(name) => names.push(config.normalize_key(name)),
                    other => {
                        return Err(EngineError::UnexpectedType {
                            expected: "key name",
                            found: other.type_name(),
                        })
                    }
                }
            }
            Ok(Some(names))
        }
        other => Err(EngineError::UnexpectedType {
            expected: "key name or list of key names",
            found: other.type_name(),
        }),
    }
}

/// Waits for one accepted key press
///
/// ```
/// use trialstate::KeyPress;
///
/// let kp = KeyPress::new().keys(vec!["J", "K"]).correct("K").duration(2.0);
/// # let _ = kp;
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyPress {
    pub(crate) name: Option<String>,
    pub(crate) lifespan: Lifespan,
    keys: Option<Ref>,
    correct: Option<Ref>,
    base_time: Option<Ref>,
}

impl KeyPress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: accepted keys (a name, a list of names, or a reference)
    pub fn keys(mut self, keys: impl Into<Ref>) -> Self {
        self.keys = Some(keys.into());
        self
    }

    /// Builder method: correct response(s)
    pub fn correct(mut self, correct: impl Into<Ref>) -> Self {
        self.correct = Some(correct.into());
        self
    }

    /// Builder method: reference point for reaction times
    pub fn base_time(mut self, base_time: impl Into<Ref>) -> Self {
        self.base_time = Some(base_time.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method: response window in seconds, measured from `base_time`
    pub fn duration(mut self, duration: impl Into<Ref>) -> Self {
        self.lifespan.duration = Some(duration.into());
        self
    }

    pub fn until(mut self, until: impl Into<Ref>) -> Self {
        self.lifespan.until = Some(until.into());
        self
    }

    pub(crate) fn into_capture(self) -> Capture {
        Capture::new(Channel::Key, self.keys, self.correct, self.base_time)
    }
}

/// Waits for one accepted pointer button press
#[derive(Debug, Clone, Default)]
pub struct PointerPress {
    pub(crate) name: Option<String>,
    pub(crate) lifespan: Lifespan,
    buttons: Option<Ref>,
    correct: Option<Ref>,
    base_time: Option<Ref>,
}

impl PointerPress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: accepted buttons
    pub fn buttons(mut self, buttons: impl Into<Ref>) -> Self {
        self.buttons = Some(buttons.into());
        self
    }

    pub fn correct(mut self, correct: impl Into<Ref>) -> Self {
        self.correct = Some(correct.into());
        self
    }

    pub fn base_time(mut self, base_time: impl Into<Ref>) -> Self {
        self.base_time = Some(base_time.into());
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

    pub(crate) fn into_capture(self) -> Capture {
        Capture::new(Channel::Pointer, self.buttons, self.correct, self.base_time)
    }
}

/// Logs every key down/up event until it is left
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyRecord {
    count: u64,
    last_key: String,
}

impl KeyRecord {
    pub const CHANNELS: [EventKind; 2] = [EventKind::KeyDown, EventKind::KeyUp];

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_key.clear();
    }

    /// Values to log for one key event
    pub fn observe(&mut self, event: &InputEvent, config: &EngineConfig) -> Option<BTreeMap<String, Value>> {
        let key = config.normalize_key(event.key_name()?);
        self.count += 1;
        self.last_key = key.clone();
        Some(BTreeMap::from([
            ("key".to_string(), Value::Str(key)),
            ("event".to_string(), Value::from(event.kind.as_str())),
            ("timestamp".to_string(), Value::Float(event.time)),
        ]))
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "count" => Some(Value::Int(self.count as i64)),
            "last_key" => Some(Value::Str(self.last_key.clone())),
            _ => None,
        }
    }
}
