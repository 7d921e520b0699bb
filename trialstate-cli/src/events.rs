//! Scripted input timeline
//!
//! Each `[[events]]` entry in a session file becomes one [`InputEvent`] that
//! the simulated host releases once the clock reaches its timestamp.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use trialstate::{EventKind, InputEvent, Modifiers};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventSpec {
    pub kind: EventKind,
    /// Clock time in seconds
    pub time: f64,
    pub key: Option<String>,
    pub button: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub keycode: Option<u32>,
}

impl EventSpec {
    pub fn to_input_event(&self) -> Result<InputEvent> {
        if !self.time.is_finite() || self.time < 0.0 {
            bail!("{} event has invalid time {}", self.kind, self.time);
        }

        let event = match self.kind {
            EventKind::KeyDown | EventKind::KeyUp => {
                let key = self
                    .key
                    .as_deref()
                    .with_context(|| format!("{} event at {}s needs a key", self.kind, self.time))?;
                let mut event = if self.kind == EventKind::KeyDown {
                    InputEvent::key_down(key, self.time)
                } else {
                    InputEvent::key_up(key, self.time)
                };
                let mut modifiers = Modifiers::empty();
                for name in &self.modifiers {
                    modifiers |= Modifiers::parse_name(name)
                        .with_context(|| format!("Unknown modifier: {}", name))?;
                }
                event = event.with_modifiers(modifiers);
                if let Some(keycode) = self.keycode {
                    event = event.with_keycode(keycode);
                }
                event
            }
            EventKind::PointerDown | EventKind::PointerUp => {
                let button = self.button.as_deref().unwrap_or("left");
                if self.kind == EventKind::PointerDown {
                    InputEvent::pointer_down(button, self.x, self.y, self.time)
                } else {
                    InputEvent::pointer_up(button, self.x, self.y, self.time)
                }
            }
            EventKind::PointerMove => InputEvent::pointer_move(self.x, self.y, self.time),
        };
        Ok(event)
    }
}

/// Convert a whole timeline
pub fn timeline(specs: &[EventSpec]) -> Result<Vec<InputEvent>> {
    specs.iter().map(EventSpec::to_input_event).collect()
}
