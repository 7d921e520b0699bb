//! Event callback registry
//!
//! Maps each [`EventKind`] to an ordered list of registrations. A registration
//! names its owner (for the engine, the leaf state that subscribed); delivery
//! is routed to the owner by the caller.
//!
//! Dispatch works on a snapshot of the list, and each registration is
//! re-checked before delivery, so an owner may unsubscribe itself (or others)
//! from inside a callback without disturbing the iteration and without a
//! removed registration ever firing.

use crate::event::EventKind;
use std::collections::HashMap;

/// Identifier returned by [`Dispatcher::add_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

#[derive(Debug, Clone)]
struct Registration<T> {
    id: CallbackId,
    owner: T,
}

/// Registry of event callbacks keyed by event kind
#[derive(Debug)]
pub struct Dispatcher<T> {
    channels: HashMap<EventKind, Vec<Registration<T>>>,
    next_id: u64,
}

impl<T: Copy + PartialEq> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register `owner` for events of `kind`; registrations fire in insertion order
    pub fn add_callback(&mut self, kind: EventKind, owner: T) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.channels
            .entry(kind)
            .or_default()
            .push(Registration { id, owner });
        id
    }

    /// Remove one registration; returns false if it was not registered
    pub fn remove_callback(&mut self, kind: EventKind, id: CallbackId) -> bool {
        let Some(registrations) = self.channels.get_mut(&kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            self.channels.remove(&kind);
        }
        removed
    }

    /// Remove every registration owned by `owner`, across all kinds
    pub fn remove_owner(&mut self, owner: T) -> usize {
        let mut removed = 0;
        self.channels.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.owner != owner);
            removed += before - registrations.len();
            !registrations.is_empty()
        });
        removed
    }

    /// Copy of the current registrations for `kind`, in delivery order
    pub fn snapshot(&self, kind: EventKind) -> Vec<(CallbackId, T)> {
        self.channels
            .get(&kind)
            .map(|registrations| registrations.iter().map(|r| (r.id, r.owner)).collect())
            .unwrap_or_default()
    }

    /// Whether a registration is still live
    pub fn is_registered(&self, kind: EventKind, id: CallbackId) -> bool {
        self.channels
            .get(&kind)
            .is_some_and(|registrations| registrations.iter().any(|r| r.id == id))
    }

    /// Number of live registrations for `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.channels.get(&kind).map_or(0, Vec::len)
    }

    /// Whether `owner` holds any registration at all
    pub fn has_owner(&self, owner: T) -> bool {
        self.channels
            .values()
            .any(|registrations| registrations.iter().any(|r| r.owner == owner))
    }
}

impl<T: Copy + PartialEq> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}
