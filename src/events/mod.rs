//! Event trait, bookkeeping, and the dispatcher's own derived events.
//!
//! Corresponds to `circuits.core.events`: a `BaseEvent`-style trait plus the
//! `Done`/`Success`/`Complete`/`Failure`/`Started`/`Stopped`/`Signal` family
//! the manager fires on its own behalf.

pub mod base;
pub mod derived;

pub use base::{uncamel, Event, EventData, EventHandle, GenericEvent, LiteralEvent};
pub use derived::{
    Complete, Done, ErrorEvent, Failure, GenerateEvents, Registered, Signal, Started, Stopped,
    Success, Unregistered,
};
