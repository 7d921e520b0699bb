//! Presentation collaborator
//!
//! Stimulus states call into a [`Presenter`] when they appear and disappear.
//! Implementations must return promptly; they may report the precise time the
//! change became visible (e.g. the flip time), which the engine then records
//! instead of the tick time.

use crate::types::{StateId, Value};
use std::collections::BTreeMap;

/// What a stimulus state asks the presenter to show
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusRequest {
    /// Stimulus state making the request
    pub state: StateId,
    /// Widget or media type, e.g. `"Label"` or `"Image"`
    pub stimulus: String,
    /// Evaluated parameters
    pub params: BTreeMap<String, Value>,
    /// Tick time at which the request is made
    pub requested_at: f64,
}

/// Receiver of show/hide calls
pub trait Presenter {
    /// Show a stimulus; returns the onset time if the presenter knows it
    fn show(&mut self, request: &StimulusRequest) -> Option<f64>;

    /// Remove a previously shown stimulus; returns the offset time if known
    fn hide(&mut self, state: StateId, requested_at: f64) -> Option<f64>;
}

/// Presenter that shows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn show(&mut self, _request: &StimulusRequest) -> Option<f64> {
        None
    }

    fn hide(&mut self, _state: StateId, _requested_at: f64) -> Option<f64> {
        None
    }
}
