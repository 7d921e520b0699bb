//! Trialstate: hierarchical real-time state machines for behavioral experiments
//!
//! An experiment is a tree of states. Leaf states do one thing (wait, show a
//! stimulus, wait for a key press, call a function); composite states decide
//! how their children share time (one after another, side by side, in a loop,
//! or conditionally).
//!
//! # Architecture
//!
//! - States live in an arena ([`StateTree`]) and are addressed by [`StateId`]
//! - [`Builder`] authors the tree and reports authoring errors up front
//! - [`Experiment`] drives the tree one tick at a time against a [`Clock`]
//! - Input events reach capture states through an event [`Dispatcher`]
//! - [`Ref`] values are deferred expressions over state attributes and
//!   variables, evaluated whenever they are read
//!
//! Timing is drift-free: a state that follows another starts at the time the
//! previous one ended, and a timed-out state ends exactly at its deadline,
//! regardless of when the tick that noticed it ran.
//!
//! The library does NOT:
//! - Render anything (see [`Presenter`])
//! - Persist logs (see [`LogSink`])
//! - Read input devices (see [`Host`])
//!
//! # Example Usage
//!
//! ```
//! use trialstate::{Builder, Clock, InputEvent, KeyPress, ManualClock, MemorySink, ScriptedHost};
//!
//! # fn main() -> trialstate::Result<()> {
//! let clock = ManualClock::new();
//! let mut builder = Builder::new();
//! builder.wait(1.0)?;
//! let response = builder.key_press(
//!     KeyPress::new().keys(vec!["J", "K"]).correct("K").duration(2.0),
//! )?;
//!
//! let sink = MemorySink::new();
//! let mut experiment = builder.build(Clock::manual(&clock))?.with_sink(sink.clone());
//! let mut host = ScriptedHost::new(clock.clone(), 60.0)
//!     .with_events(vec![InputEvent::key_down("K", 1.42)]);
//!
//! experiment.run(&mut host)?;
//! assert_eq!(experiment.attribute(response, "pressed")?.as_str(), Some("K"));
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod builder;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod event;
pub mod experiment;
pub mod expr;
pub mod host;
pub mod presenter;
pub mod reference;
pub mod sink;
pub mod state;
pub mod states;
pub mod types;

// Re-export main types for convenience
pub use builder::Builder;
pub use clock::{Clock, ManualClock, MonotonicSource, TimeSource};
pub use config::EngineConfig;
pub use dispatcher::{CallbackId, Dispatcher};
pub use event::{EventKind, InputEvent, KeyInput, Modifiers, Payload, PointerInput};
pub use experiment::{Experiment, RunSummary, TickStatus};
pub use host::{Host, ScriptedHost};
pub use presenter::{NullPresenter, Presenter, StimulusRequest};
pub use reference::{BinaryOp, Ref, Scope, UnaryOp};
pub use sink::{LogRecord, LogSink, MemorySink, NullSink};
pub use state::{Lifespan, StateTree};
pub use states::{Function, KeyPress, LogValues, ParallelMode, PointerPress, Record, Stimulus};
pub use types::{EngineError, FaultReport, Phase, Result, StateFault, StateId, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
