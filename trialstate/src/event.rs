//! Input events delivered by the host
//!
//! Timestamps are taken from the same clock domain as [`crate::Clock::now`],
//! so a reaction time is a plain subtraction.

use crate::types::EngineError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel an event is delivered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    KeyDown,
    KeyUp,
    PointerDown,
    PointerUp,
    PointerMove,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::KeyDown => "KEY_DOWN",
            EventKind::KeyUp => "KEY_UP",
            EventKind::PointerDown => "POINTER_DOWN",
            EventKind::PointerUp => "POINTER_UP",
            EventKind::PointerMove => "POINTER_MOVE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "KEY_DOWN" => Ok(EventKind::KeyDown),
            "KEY_UP" => Ok(EventKind::KeyUp),
            "POINTER_DOWN" => Ok(EventKind::PointerDown),
            "POINTER_UP" => Ok(EventKind::PointerUp),
            "POINTER_MOVE" => Ok(EventKind::PointerMove),
            _ => Err(EngineError::UnknownEventKind(s.to_string())),
        }
    }
}

bitflags! {
    /// Modifier keys held during a key event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL = 0b0010;
        const ALT = 0b0100;
        const META = 0b1000;
    }
}

impl Modifiers {
    /// Parse a modifier name such as `"shift"` or `"Ctrl"`
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "shift" => Some(Modifiers::SHIFT),
            "ctrl" | "control" => Some(Modifiers::CTRL),
            "alt" | "option" => Some(Modifiers::ALT),
            "meta" | "cmd" | "super" => Some(Modifiers::META),
            _ => None,
        }
    }
}

/// Key event payload
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInput {
    /// Platform keycode (0 when unknown)
    pub keycode: u32,
    /// Symbolic key name, e.g. `"K"` or `"SPACEBAR"`
    pub key: String,
    /// Text produced by the key, if any
    pub text: Option<String>,
    pub modifiers: Modifiers,
}

/// Pointer event payload
#[derive(Debug, Clone, PartialEq)]
pub struct PointerInput {
    pub x: f64,
    pub y: f64,
    /// Button name for press/release events (`"LEFT"`, `"RIGHT"`, ...)
    pub button: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Key(KeyInput),
    Pointer(PointerInput),
}

/// An event as delivered by the host
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub kind: EventKind,
    /// Event timestamp in clock seconds
    pub time: f64,
    pub payload: Payload,
}

impl InputEvent {
    fn key(kind: EventKind, key: impl Into<String>, time: f64) -> Self {
        let key = key.into();
        let text = (key.chars().count() == 1).then(|| key.to_lowercase());
        Self {
            kind,
            time,
            payload: Payload::Key(KeyInput {
                keycode: 0,
                key,
                text,
                modifiers: Modifiers::empty(),
            }),
        }
    }

    pub fn key_down(key: impl Into<String>, time: f64) -> Self {
        Self::key(EventKind::KeyDown, key, time)
    }

    pub fn key_up(key: impl Into<String>, time: f64) -> Self {
        Self::key(EventKind::KeyUp, key, time)
    }

    pub fn pointer_down(button: impl Into<String>, x: f64, y: f64, time: f64) -> Self {
        Self {
            kind: EventKind::PointerDown,
            time,
            payload: Payload::Pointer(PointerInput {
                x,
                y,
                button: Some(button.into()),
            }),
        }
    }

    pub fn pointer_up(button: impl Into<String>, x: f64, y: f64, time: f64) -> Self {
        Self {
            kind: EventKind::PointerUp,
            ..Self::pointer_down(button, x, y, time)
        }
    }

    pub fn pointer_move(x: f64, y: f64, time: f64) -> Self {
        Self {
            kind: EventKind::PointerMove,
            time,
            payload: Payload::Pointer(PointerInput { x, y, button: None }),
        }
    }

    /// Builder method: attach modifier flags to a key event
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        if let Payload::Key(key) = &mut self.payload {
            key.modifiers = modifiers;
        }
        self
    }

    /// Builder method: attach a platform keycode to a key event
    pub fn with_keycode(mut self, keycode: u32) -> Self {
        if let Payload::Key(key) = &mut self.payload {
            key.keycode = keycode;
        }
        self
    }

    /// Key name for key events
    pub fn key_name(&self) -> Option<&str> {
        match &self.payload {
            Payload::Key(key) => Some(&key.key),
            Payload::Pointer(_) => None,
        }
    }

    /// Button name for pointer press/release events
    pub fn button(&self) -> Option<&str> {
        match &self.payload {
            Payload::Pointer(pointer) => pointer.button.as_deref(),
            Payload::Key(_) => None,
        }
    }

    /// Pointer position for pointer events
    pub fn position(&self) -> Option<(f64, f64)> {
        match &self.payload {
            Payload::Pointer(pointer) => Some((pointer.x, pointer.y)),
            Payload::Key(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip_names() {
        assert_eq!("key_down".parse::<EventKind>().unwrap(), EventKind::KeyDown);
        assert_eq!("POINTER_MOVE".parse::<EventKind>().unwrap(), EventKind::PointerMove);
        assert_eq!(EventKind::PointerUp.to_string(), "POINTER_UP");
        assert!("KEY_PRESS".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_key_event_builders() {
        let event = InputEvent::key_down("K", 0.42).with_modifiers(Modifiers::SHIFT | Modifiers::CTRL);
        assert_eq!(event.key_name(), Some("K"));
        assert_eq!(event.button(), None);
        match &event.payload {
            Payload::Key(key) => {
                assert_eq!(key.text.as_deref(), Some("k"));
                assert!(key.modifiers.contains(Modifiers::SHIFT));
                assert!(!key.modifiers.contains(Modifiers::ALT));
            }
            Payload::Pointer(_) => panic!("expected key payload"),
        }
    }

    #[test]
    fn test_pointer_event_builders() {
        let event = InputEvent::pointer_up("LEFT", 10.0, 20.0, 1.0);
        assert_eq!(event.kind, EventKind::PointerUp);
        assert_eq!(event.button(), Some("LEFT"));
        assert_eq!(event.position(), Some((10.0, 20.0)));
        assert_eq!(InputEvent::pointer_move(1.0, 2.0, 0.0).button(), None);
    }

    #[test]
    fn test_modifier_names() {
        assert_eq!(Modifiers::parse_name("Shift"), Some(Modifiers::SHIFT));
        assert_eq!(Modifiers::parse_name("cmd"), Some(Modifiers::META));
        assert_eq!(Modifiers::parse_name("hyper"), None);
    }
}
