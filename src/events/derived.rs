//! Events the dispatcher fires on its own behalf: the `done`/`success`/
//! `complete`/`failure` family from causal completion tracking, the
//! lifecycle events (`started`/`stopped`/`signal`), the tree-mutation events
//! (`registered`/`unregistered`), and the `generate_events` I/O poll point.
//!
//! Grounded on `circuits.core.events`: `Done`, `Success`, `Complete`,
//! `Failure`, `Started`, `Stopped`, `Signal`, `Registered`, `Unregistered`,
//! and the `DerivedEvent.create` naming convention (simplified here to a
//! single `"{kind}_{topic}"` form for both literal and derived topics,
//! rather than circuits' two-branch CamelCase/snake_case split — see
//! DESIGN.md).

use crate::component::ComponentId;
use crate::events::base::{uncamel, EventData, LiteralEvent};
use crate::handler::HandlerId;
use crate::impl_event;
use serde_json::Value as JsonValue;

fn derived_name(kind: &str, topic: &str) -> String {
    format!("{}_{}", kind, topic)
}

macro_rules! derived_event {
    ($ty:ident, $kind:literal) => {
        #[derive(Debug)]
        pub struct $ty {
            pub data: EventData,
        }

        impl $ty {
            pub fn new(topic: &str, value: Option<JsonValue>) -> Self {
                let mut data = EventData::new(derived_name($kind, topic));
                if let Some(v) = value {
                    data.args.push(v);
                }
                $ty { data }
            }
        }

        impl_event!($ty);
        impl LiteralEvent for $ty {}
    };
}

derived_event!(Done, "done");
derived_event!(Success, "success");
derived_event!(Complete, "complete");

/// Fired when a handler errors or panics. Always carries the error message
/// as its sole positional argument.
#[derive(Debug)]
pub struct Failure {
    pub data: EventData,
}

impl Failure {
    pub fn new(topic: &str, error: impl Into<String>) -> Self {
        let mut data = EventData::new(derived_name("failure", topic));
        data.args.push(JsonValue::String(error.into()));
        Failure { data }
    }
}

impl_event!(Failure);
impl LiteralEvent for Failure {}

/// Fired alongside `failure`, always, regardless of whether the event asked
/// for a `failure` event. Carries `(handler, error)`.
#[derive(Debug)]
pub struct ErrorEvent {
    pub data: EventData,
}

impl ErrorEvent {
    pub fn new(handler: Option<HandlerId>, error: impl Into<String>) -> Self {
        let mut data = EventData::new("error");
        data.args.push(JsonValue::String(
            handler.map(|h| format!("{:?}", h)).unwrap_or_default(),
        ));
        data.args.push(JsonValue::String(error.into()));
        ErrorEvent { data }
    }
}

impl_event!(ErrorEvent);
impl LiteralEvent for ErrorEvent {}

/// The dispatcher's own I/O poll point, fired once per tick on `"*"` while
/// running. Handlers get the remaining idle budget and may shrink it by
/// calling `reduce_time_left`.
#[derive(Debug)]
pub struct GenerateEvents {
    pub data: EventData,
    time_left: std::sync::atomic::AtomicI64,
}

impl GenerateEvents {
    pub fn new(timeout_millis: i64) -> Self {
        GenerateEvents {
            data: EventData::new("generate_events"),
            time_left: std::sync::atomic::AtomicI64::new(timeout_millis),
        }
    }

    pub fn time_left(&self) -> i64 {
        self.time_left.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Shrinks the remaining idle budget; never increases it. Foreign
    /// threads call this (via the root lock) to wake a sleeping dispatcher.
    pub fn reduce_time_left(&self, millis: i64) {
        use std::sync::atomic::Ordering;
        let mut cur = self.time_left.load(Ordering::Relaxed);
        while millis < cur {
            match self
                .time_left
                .compare_exchange_weak(cur, millis, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }
}

impl_event!(GenerateEvents);
impl LiteralEvent for GenerateEvents {}

#[derive(Debug)]
pub struct Started {
    pub data: EventData,
}

impl Started {
    pub fn new(component: ComponentId) -> Self {
        let mut data = EventData::new("started");
        data.args.push(JsonValue::String(format!("{:?}", component)));
        Started { data }
    }
}
impl_event!(Started);
impl LiteralEvent for Started {}

#[derive(Debug)]
pub struct Stopped {
    pub data: EventData,
}

impl Stopped {
    pub fn new(component: ComponentId) -> Self {
        let mut data = EventData::new("stopped");
        data.args.push(JsonValue::String(format!("{:?}", component)));
        Stopped { data }
    }
}
impl_event!(Stopped);
impl LiteralEvent for Stopped {}

/// Fired from the signal handler on the main thread only
/// (`Manager::run` installs it with a runtime, not compile-time, main-thread
/// check, matching circuits' `current_thread().getName() == "MainThread"`).
#[derive(Debug)]
pub struct Signal {
    pub data: EventData,
}

impl Signal {
    pub fn new(signo: i32) -> Self {
        let mut data = EventData::new("signal");
        data.args.push(JsonValue::from(signo));
        Signal { data }
    }

    pub fn signo(&self) -> i32 {
        self.data.args[0].as_i64().unwrap_or_default() as i32
    }
}
impl_event!(Signal);
impl LiteralEvent for Signal {}

#[derive(Debug)]
pub struct Registered {
    pub data: EventData,
}

impl Registered {
    pub fn new(child: ComponentId, parent: ComponentId) -> Self {
        let mut data = EventData::new("registered");
        data.args.push(JsonValue::String(format!("{:?}", child)));
        data.args.push(JsonValue::String(format!("{:?}", parent)));
        Registered { data }
    }
}
impl_event!(Registered);
impl LiteralEvent for Registered {}

#[derive(Debug)]
pub struct Unregistered {
    pub data: EventData,
}

impl Unregistered {
    pub fn new(child: ComponentId, parent: Option<ComponentId>) -> Self {
        let mut data = EventData::new("unregistered");
        data.args.push(JsonValue::String(format!("{:?}", child)));
        data.args
            .push(parent.map(|p| JsonValue::String(format!("{:?}", p))).unwrap_or(JsonValue::Null));
        Unregistered { data }
    }
}
impl_event!(Unregistered);
impl LiteralEvent for Unregistered {}

/// Re-exported for symmetry with circuits' `uncamel`-derived default names;
/// derived event constructors above bypass it and build their name directly.
pub fn default_name_for(type_name: &str) -> String {
    uncamel(type_name)
}
