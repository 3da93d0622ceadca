//! Handler descriptors and the sort/match rules [`crate::registry`] applies
//! when resolving which handlers fire for an event.
//!
//! Grounded on circuits' handler metadata (`_sortkey = (handler.priority,
//! handler.filter)`, channel matching in `Manager.getHandlers`) and on the
//! teacher's `HandlerId`/closure-registration shape in
//! `src/events/event_bus.rs` (`SyncHandler`, `HandlerEntry`).

use crate::component::ComponentId;
use crate::events::EventHandle;
use crate::manager::Manager;
use crate::scheduler::CoTask;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a handler invocation produced.
pub enum HandlerOutcome {
    /// A plain, immediately-available value.
    Value(JsonValue),
    /// The handler wants to suspend via the cooperative task scheduler
    /// (`wait`/`call`); see [`crate::task`].
    Suspend(Box<dyn CoTask>),
    /// Nothing to report.
    None,
}

/// A handler receives the dispatching manager and a clone of the event
/// handle (not a locked reference): the dispatcher does not hold the
/// event's mutex while a handler runs, so the handler locks it itself for
/// however long it needs. This is the one deliberate departure from
/// circuits' calling convention, which hands the generator the live event
/// object directly — Rust's ownership rules make that reference awkward to
/// thread through `fire`-from-within-a-handler without risking a
/// self-deadlock (see DESIGN.md).
pub type HandlerFn = Arc<dyn Fn(&Manager, &EventHandle) -> HandlerOutcome + Send + Sync>;

/// A registered handler.
///
/// `wants_event` records whether the handler was declared to receive the
/// event object alongside its args/kwargs. Rust's static closure signature
/// can't vary arity the way circuits' dynamic calling convention does, so
/// every [`HandlerFn`] always receives the event handle; the flag is kept as
/// descriptive metadata only (see DESIGN.md).
#[derive(Clone)]
pub struct Handler {
    pub id: HandlerId,
    pub component: ComponentId,
    pub name: String,
    /// `None` binds to the component's own channel; `Some("*")` is global.
    pub channel: Option<String>,
    pub priority: i32,
    /// A filter handler breaks the handler chain once it produces a value.
    pub filter: bool,
    pub wants_event: bool,
    pub func: HandlerFn,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("priority", &self.priority)
            .field("filter", &self.filter)
            .finish()
    }
}

/// Sort key matching circuits' `_sortkey(handler) = (handler.priority,
/// handler.filter)`, descending: wrapped in `Reverse` so the natural
/// ascending `sort_by_key` callers use puts the highest priority (and, on a
/// tie, filter handlers) first. The handler id is a final ascending
/// tiebreaker (circuits relies on Python's stable sort plus list order; our
/// resolution cache can merge handlers from several components, so we need
/// an explicit one).
pub fn sort_key(h: &Handler) -> (std::cmp::Reverse<i32>, std::cmp::Reverse<bool>, HandlerId) {
    (
        std::cmp::Reverse(h.priority),
        std::cmp::Reverse(h.filter),
        h.id,
    )
}
