//! Cooperative task scheduler: the Rust re-architecture of circuits'
//! generator-based `wait`/`call` primitives.
//!
//! circuits represents a suspended handler as a Python generator and steps
//! it with `next()`/`send()`, inspecting whatever it yields (a task-state
//! dict, a nested generator, or a `CallValue`). Rust has no generators, so a
//! handler that wants to suspend returns a boxed [`CoTask`] instead: an
//! explicit state machine whose `step` method returns a [`StepResult`]
//! enumerating exactly the three shapes circuits' dispatcher pattern-matches
//! on (`Yielded(TaskState)`, `Yielded(Nested)`, `Yielded(CallValue)`), plus
//! `Done`/`Raised` for what would otherwise be `StopIteration`/an exception
//! escaping the generator. Grounded on `circuits.core.manager`'s
//! `waitEvent`/`callEvent`/`processTask`.

use crate::events::{Event, EventHandle};
use crate::handler::HandlerId;
use crate::manager::Manager;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared rendezvous record a [`WaitTask`] installs while suspended.
/// Mirrors circuits' `state = {'run': False, 'flag': False, 'event': None,
/// 'timeout': ...}` dict captured by the three dynamically-installed
/// handlers in `waitEvent`.
pub struct SharedTaskState {
    pub run: bool,
    pub flag: bool,
    pub event: Option<EventHandle>,
    pub timeout: i64,
}

pub type SharedState = Arc<Mutex<SharedTaskState>>;

pub enum Yielded {
    /// First suspension point: hand the scheduler the rendezvous state so it
    /// can park this task until one of the installed handlers reschedules it.
    State(SharedState),
    /// This task itself suspended on another lazy sequence (a `call()` whose
    /// body delegates to `wait()`, or a handler-authored nested task).
    Nested(Box<dyn CoTask>),
    /// Final value produced by a `wait`/`call` chain, to be unwrapped and
    /// sent into whichever task is waiting on this one (or, if none, stored
    /// directly into the originating event's value).
    Call(JsonValue),
}

pub enum StepResult {
    Yield(Yielded),
    Done(Option<JsonValue>),
    Raised(crate::error::TaskError),
}

/// A suspendable unit of work. `resume` carries the value sent into this
/// task by whatever it was waiting on (`Some` only after a nested task's
/// `Yielded::Call` resolves); the first call always passes `None`.
pub trait CoTask: Send {
    fn step(&mut self, mgr: &Manager, resume: Option<JsonValue>) -> StepResult;

    /// Polled by the scheduler on every tick while this task sits parked
    /// (after its first `Yielded::State`); once true, it is re-admitted to
    /// the ready queue and stepped again. Tasks that never park (e.g.
    /// [`CallTask`], which only ever nests or forwards) can keep the default.
    fn is_ready(&self) -> bool {
        false
    }
}

/// `wait(event_name, *channels, timeout=...)`: suspends the calling task
/// until a matching event fires, or `timeout` elapses. Grounded on circuits'
/// `Manager.waitEvent`.
pub struct WaitTask {
    event_name: String,
    channels: Vec<String>,
    timeout: i64,
    state: Option<SharedState>,
    handler_ids: Vec<HandlerId>,
    installed: bool,
}

impl WaitTask {
    pub fn new(event_name: impl Into<String>, channels: Vec<String>, timeout: i64) -> Self {
        WaitTask {
            event_name: event_name.into(),
            channels,
            timeout,
            state: None,
            handler_ids: Vec::new(),
            installed: false,
        }
    }
}

impl CoTask for WaitTask {
    fn is_ready(&self) -> bool {
        self.state.as_ref().map(|s| s.lock().flag).unwrap_or(false)
    }

    fn step(&mut self, mgr: &Manager, _resume: Option<JsonValue>) -> StepResult {
        if !self.installed {
            let state: SharedState = Arc::new(Mutex::new(SharedTaskState {
                run: false,
                flag: false,
                event: None,
                timeout: self.timeout,
            }));
            self.handler_ids = mgr.install_wait_handlers(
                &self.event_name,
                &self.channels,
                self.timeout,
                state.clone(),
            );
            self.state = Some(state.clone());
            self.installed = true;
            return StepResult::Yield(Yielded::State(state));
        }

        // Resumed: a wait handler fired and rescheduled us. Tear down the
        // remaining installed handlers and report whatever was captured.
        for id in self.handler_ids.drain(..) {
            mgr.remove_handler(id);
        }
        let observed = self
            .state
            .take()
            .and_then(|s| s.lock().event.take())
            .map(|handle| handle.lock().data().value.get().unwrap_or(JsonValue::Null))
            .unwrap_or(JsonValue::Null);
        StepResult::Yield(Yielded::Call(observed))
    }
}

/// `call(event, *channels, timeout=...)`: fires `event` then waits for its
/// result. Grounded on circuits' `Manager.callEvent`.
pub struct CallTask {
    event: Option<Box<dyn Event>>,
    channels: Vec<String>,
    timeout: i64,
    fired: bool,
}

impl CallTask {
    pub fn new(event: Box<dyn Event>, channels: Vec<String>, timeout: i64) -> Self {
        CallTask {
            event: Some(event),
            channels,
            timeout,
            fired: false,
        }
    }
}

impl CoTask for CallTask {
    fn step(&mut self, mgr: &Manager, resume: Option<JsonValue>) -> StepResult {
        if !self.fired {
            self.fired = true;
            let event = self.event.take().expect("CallTask stepped twice before fire");
            let name = event.name().to_string();
            mgr.fire_boxed(event, self.channels.clone(), 0);
            let wait = WaitTask::new(name, self.channels.clone(), self.timeout);
            return StepResult::Yield(Yielded::Nested(Box::new(wait)));
        }
        // The nested WaitTask settled; `resume` carries its observed value.
        // Pass it straight through as our own call result.
        StepResult::Yield(Yielded::Call(resume.unwrap_or(JsonValue::Null)))
    }
}
