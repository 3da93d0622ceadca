//! Event trait and the bookkeeping every fired event carries.
//!
//! Grounded on the teacher's `BaseEvent`/`BaseEventData` split
//! (`src/events/base_event.rs`) and its `impl_base_event!` delegation macro;
//! generalized from crewAI's fixed agent/task metadata fields to the
//! dispatch-level bookkeeping (`cause`/`effects`/`waitingHandlers`/`stopped`)
//! that `circuits.core.events.BaseEvent` and `circuits.core.manager` track.

use crate::handler::HandlerId;
use crate::value::Value;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle onto a fired event shared between the dispatcher and any
/// descendant events it causes. Strong references keep an ancestor alive
/// until its full causal subtree (`effects`) reaches zero, mirroring
/// circuits keeping `event.cause` as a live Python object reference.
pub type EventHandle = Arc<Mutex<Box<dyn Event>>>;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Converts a `CamelCase` type name into the dispatch name circuits derives
/// via `uncamel` (`EventMetaClass`): `TaskStarted` -> `task_started`.
pub fn uncamel(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.char_indices() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug)]
pub struct EventData {
    pub name: String,
    /// Resolved at fire time; empty until `Manager::fire` fills in the
    /// channel fallback chain (`event.channels or (self.channel,) or ("*",)`).
    pub channels: Vec<String>,
    pub args: Vec<JsonValue>,
    pub kwargs: HashMap<String, JsonValue>,
    pub value: Value,
    pub priority: i32,
    /// Request a `complete` event once this event and everything it
    /// transitively caused has finished.
    pub complete: bool,
    /// Request a `success` event once this event's handlers all ran without
    /// error.
    pub success: bool,
    /// Request a `done` event once this event's handlers (including any
    /// suspended tasks) have all finished, regardless of outcome.
    pub alert_done: bool,
    pub success_channels: Option<Vec<String>>,
    pub complete_channels: Option<Vec<String>>,

    // --- dispatcher-owned bookkeeping, mutated only from the dispatcher
    // thread (or under the root lock for foreign-thread fires) ---
    pub waiting_handlers: i32,
    pub handler: Option<HandlerId>,
    pub stopped: bool,
    pub cause: Option<EventHandle>,
    pub effects: i32,
    pub sequence: u64,
}

impl EventData {
    pub fn new(name: impl Into<String>) -> Self {
        EventData {
            name: name.into(),
            channels: Vec::new(),
            args: Vec::new(),
            kwargs: HashMap::new(),
            value: Value::new(),
            priority: 0,
            complete: false,
            success: false,
            alert_done: false,
            success_channels: None,
            complete_channels: None,
            waiting_handlers: 0,
            handler: None,
            stopped: false,
            cause: None,
            effects: 0,
            sequence: 0,
        }
    }

    /// Stops further handler dispatch for this event (circuits' `event.stop()`).
    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// A fireable event. Concrete event kinds embed an [`EventData`] and derive
/// the trait body with [`impl_event!`], the way the teacher's event types
/// embed `BaseEventData` and invoke `impl_base_event!`.
pub trait Event: Any + Send + fmt::Debug {
    fn data(&self) -> &EventData;
    fn data_mut(&mut self) -> &mut EventData;
    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> &str {
        &self.data().name
    }

    fn channels(&self) -> &[String] {
        &self.data().channels
    }
}

/// Marker for events whose dispatch name should NOT be derived via
/// [`uncamel`] from the struct name — circuits' `LiteralEvent`, used for
/// events constructed with an explicit, already-final name (e.g. derived
/// events themselves).
pub trait LiteralEvent: Event {}

/// Delegates the [`Event`] trait to an embedded `data: EventData` field.
/// Mirrors the teacher's `impl_base_event!` macro.
#[macro_export]
macro_rules! impl_event {
    ($ty:ty) => {
        impl $crate::events::base::Event for $ty {
            fn data(&self) -> &$crate::events::base::EventData {
                &self.data
            }
            fn data_mut(&mut self) -> &mut $crate::events::base::EventData {
                &mut self.data
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
    };
}

/// A plain, user-defined event with no extra fields beyond the common
/// bookkeeping. Handy for ad hoc fires and tests; named events with their
/// own payload should define their own struct and call [`impl_event!`].
#[derive(Debug)]
pub struct GenericEvent {
    pub data: EventData,
}

impl GenericEvent {
    pub fn new(name: impl Into<String>) -> Self {
        GenericEvent {
            data: EventData::new(name),
        }
    }

    pub fn with_args(mut self, args: Vec<JsonValue>) -> Self {
        self.data.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: HashMap<String, JsonValue>) -> Self {
        self.data.kwargs = kwargs;
        self
    }

    pub fn on_channels(mut self, channels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.data.channels = channels.into_iter().map(Into::into).collect();
        self
    }
}

impl_event!(GenericEvent);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncamel_matches_circuits() {
        assert_eq!(uncamel("Started"), "started");
        assert_eq!(uncamel("TaskStarted"), "task_started");
        assert_eq!(uncamel("HTTPError"), "h_t_t_p_error");
    }

    #[test]
    fn generic_event_roundtrips_name() {
        let e = GenericEvent::new("ping");
        assert_eq!(e.name(), "ping");
    }
}
