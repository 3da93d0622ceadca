//! The dispatcher: queue, handler resolution, task stepping, causal
//! completion tracking, and lifecycle, all driven from a single thread.
//!
//! Grounded on `circuits.core.manager.Manager`: one dispatcher thread steps
//! registered tasks, fires `generate_events` as its I/O poll point, then
//! flushes exactly as many queued events as were present at the start of the
//! tick. Foreign threads may only `fire` (under the root lock) or call
//! `stop`.

use crate::component::{ComponentId, Tree};
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::events::base::next_sequence;
use crate::events::{Complete, Done, Event, EventHandle, ErrorEvent, Failure, GenerateEvents, Registered, Signal, Started, Stopped, Success, Unregistered};
use crate::handler::{Handler, HandlerFn, HandlerId, HandlerOutcome};
use crate::queue::EventQueue;
use crate::registry::Registry;
use crate::scheduler::{CoTask, SharedState, StepResult, TaskId, Yielded};
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle, ThreadId};

struct TaskEntry {
    event: EventHandle,
    task: Box<dyn CoTask>,
    parent: Option<TaskId>,
}

#[derive(Default)]
struct TaskTable {
    entries: HashMap<TaskId, TaskEntry>,
    ready: VecDeque<TaskId>,
}

struct State {
    tree: Mutex<Tree>,
    registry: Mutex<Registry>,
    queue: Mutex<EventQueue>,
    queue_cv: Condvar,
    tasks: Mutex<TaskTable>,
    running: AtomicBool,
    currently_handling: Mutex<Option<EventHandle>>,
    executing_thread: Mutex<Option<ThreadId>>,
    config: ManagerConfig,
}

/// A cheap, `Clone`-able handle onto the dispatcher. All mutable state lives
/// behind the shared `Arc`, matching circuits' single `root` manager object
/// that every component and foreign thread talks to.
#[derive(Clone)]
pub struct Manager {
    state: Arc<State>,
}

fn channel_of(event: &EventHandle) -> Vec<String> {
    event.lock().channels().to_vec()
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Manager {
            state: Arc::new(State {
                tree: Mutex::new(Tree::new()),
                registry: Mutex::new(Registry::new()),
                queue: Mutex::new(EventQueue::new()),
                queue_cv: Condvar::new(),
                tasks: Mutex::new(TaskTable::default()),
                running: AtomicBool::new(false),
                currently_handling: Mutex::new(None),
                executing_thread: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn root(&self) -> ComponentId {
        ComponentId::ROOT
    }

    // --- component tree -----------------------------------------------

    /// Registers a new component under `parent`, giving it `channel` as its
    /// default fire target. Fires `registered`.
    ///
    /// Errs with [`ManagerError::UnknownComponent`] if `parent` is not
    /// itself registered with this manager.
    pub fn register_component(
        &self,
        parent: ComponentId,
        channel: Option<String>,
    ) -> Result<ComponentId, ManagerError> {
        let mut tree = self.state.tree.lock();
        if !tree.contains(parent) {
            return Err(ManagerError::UnknownComponent(parent));
        }
        let id = ComponentId::new();
        tree.register(id, parent, channel);
        drop(tree);
        self.state.registry.lock().mark_dirty();
        self.fire(Registered::new(id, parent), &["*"]);
        Ok(id)
    }

    /// Unregisters a component (and its subtree). Fires `unregistered`.
    pub fn unregister_component(&self, id: ComponentId) {
        let parent = self.state.tree.lock().unregister(id);
        self.state.registry.lock().mark_dirty();
        self.fire(Unregistered::new(id, parent), &["*"]);
    }

    /// Whether `id` is currently registered in this manager's tree.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.state.tree.lock().contains(id)
    }

    // --- handlers --------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn add_handler(
        &self,
        component: ComponentId,
        event_name: impl Into<String>,
        channel: Option<String>,
        priority: i32,
        filter: bool,
        wants_event: bool,
        func: HandlerFn,
    ) -> HandlerId {
        let id = HandlerId::next();
        let handler = Handler {
            id,
            component,
            name: event_name.into(),
            channel,
            priority,
            filter,
            wants_event,
            func,
        };
        let mut tree = self.state.tree.lock();
        self.state.registry.lock().insert(&mut tree, handler);
        id
    }

    pub fn remove_handler(&self, id: HandlerId) {
        let mut tree = self.state.tree.lock();
        self.state.registry.lock().remove(&mut tree, id);
    }

    // --- firing ------------------------------------------------------

    pub fn fire(&self, event: impl Event + 'static, channels: &[&str]) -> Value {
        self.fire_boxed(Box::new(event), channels.iter().map(|s| s.to_string()).collect(), 0)
    }

    pub fn fire_priority(&self, event: impl Event + 'static, channels: &[&str], priority: i32) -> Value {
        self.fire_boxed(
            Box::new(event),
            channels.iter().map(|s| s.to_string()).collect(),
            priority,
        )
    }

    /// Core of circuits' `fireEvent`/`_fire`: resolves the channel fallback,
    /// assigns a cause if fired from within another event's handler, and
    /// pushes onto the queue.
    pub fn fire_boxed(&self, mut event: Box<dyn Event>, mut channels: Vec<String>, priority: i32) -> Value {
        if channels.is_empty() {
            channels = vec!["*".to_string()];
        }
        event.data_mut().channels = channels.clone();
        event.data_mut().priority = priority;
        let value = event.data().value.clone();

        let handle: EventHandle = Arc::new(Mutex::new(event));

        if let Some(handling) = self.state.currently_handling.lock().clone() {
            let has_cause = handling.lock().data().cause.is_some();
            if has_cause {
                handle.lock().data_mut().cause = Some(handling.clone());
                handle.lock().data_mut().effects = 1;
                handling.lock().data_mut().effects += 1;
            }
            // Waking a sleeping dispatcher: if the event currently being
            // handled is `generate_events` itself, shrink its remaining
            // budget so the in-flight tick's idle wait is cut short too.
            if handling.lock().name() == "generate_events" {
                if let Some(ge) = handling.lock().as_any().downcast_ref::<GenerateEvents>() {
                    ge.reduce_time_left(0);
                }
            }
        }

        let seq = next_sequence();
        self.state.queue.lock().push(handle, channels, priority, seq);
        self.state.queue_cv.notify_all();
        value
    }

    pub fn queue_len(&self) -> usize {
        self.state.queue.lock().len()
    }

    // --- flush / dispatch ----------------------------------------------

    /// Pops and dispatches exactly as many events as were queued at the
    /// moment `flush` was called, matching circuits' `_flush` snapshot
    /// (`_flush_batch`) so events fired *during* this flush run on the next
    /// tick instead of being processed unboundedly in one pass.
    pub fn flush(&self) {
        let batch = self.state.queue.lock().len();
        for _ in 0..batch {
            let popped = self.state.queue.lock().pop();
            let Some((handle, channels)) = popped else {
                break;
            };
            self.dispatch(handle, channels);
        }
    }

    fn dispatch(&self, handle: EventHandle, channels: Vec<String>) {
        {
            let mut guard = handle.lock();
            let data = guard.data_mut();
            if data.complete && data.cause.is_none() {
                data.cause = Some(handle.clone());
                data.effects = 1;
            }
        }

        let event_name = handle.lock().name().to_string();
        let resolved = {
            let mut registry = self.state.registry.lock();
            let tree = self.state.tree.lock();
            let mut ids = Vec::new();
            for ch in &channels {
                ids.extend(registry.resolve(&tree, ComponentId::ROOT, &event_name, ch));
            }
            ids.sort();
            ids.dedup();
            ids.sort_by_key(|id| registry.get(*id).map(crate::handler::sort_key));
            ids
        };

        *self.state.currently_handling.lock() = Some(handle.clone());

        let mut ran_any = false;
        for id in resolved {
            let handler = {
                let registry = self.state.registry.lock();
                registry.get(id).cloned()
            };
            let Some(handler) = handler else { continue };
            ran_any = true;
            handle.lock().data_mut().handler = Some(id);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (handler.func)(self, &handle)));

            let mut own_value: Option<JsonValue> = None;
            match outcome {
                Ok(HandlerOutcome::Value(v)) => {
                    handle.lock().data().value.set(v.clone());
                    own_value = Some(v);
                }
                Ok(HandlerOutcome::Suspend(task)) => {
                    handle.lock().data_mut().waiting_handlers += 1;
                    handle.lock().data().value.set_promise(true);
                    self.register_task(handle.clone(), task, None);
                }
                Ok(HandlerOutcome::None) => {}
                Err(payload) => {
                    let message = panic_message(&payload);
                    self.report_handler_failure(&handle, Some(id), &message);
                }
            }

            let stopped = handle.lock().data().stopped;
            // circuits gates the filter short-circuit on *this handler's own*
            // return value being truthy (`manager.py`: `if handler.filter and
            // value:`), not on whether the event's accumulated value has ever
            // been set by any earlier handler.
            if handler.filter && own_value.as_ref().is_some_and(is_truthy) {
                break;
            }
            if stopped {
                break;
            }
        }

        if !ran_any
            && self.state.config.unhandled_event_level == crate::config::UnhandledEventLevel::Warn
        {
            log::warn!("unhandled event: {}", event_name);
        }

        *self.state.currently_handling.lock() = None;
        self.event_done(handle);
    }

    fn report_handler_failure(&self, handle: &EventHandle, handler: Option<HandlerId>, message: &str) {
        log::error!("handler {:?} failed: {}", handler, message);
        handle.lock().data().value.set_errors(true);
        let name = handle.lock().name().to_string();
        let failure_channels = handle.lock().channels().to_vec();
        self.fire_boxed(Box::new(Failure::new(&name, message)), failure_channels, 0);
        self.fire(ErrorEvent::new(handler, message), &["*"]);
    }

    // --- causal completion tracking --------------------------------------

    /// `_eventDone`: fires `done`/`success`, then walks the cause chain
    /// firing `complete` for every ancestor whose `effects` count reaches
    /// zero.
    fn event_done(&self, handle: EventHandle) {
        {
            let waiting = handle.lock().data().waiting_handlers;
            if waiting > 0 {
                return;
            }
        }

        let (alert_done, has_errors, wants_success, success_channels, name, value) = {
            let guard = handle.lock();
            let data = guard.data();
            (
                data.alert_done,
                data.value.errors(),
                data.success,
                data.success_channels.clone(),
                data.name.clone(),
                data.value.get(),
            )
        };

        if alert_done {
            self.fire(Done::new(&name, value.clone()), &["*"]);
        }
        if !has_errors && wants_success {
            let channels = success_channels.unwrap_or_else(|| channel_of(&handle));
            self.fire_boxed(Box::new(Success::new(&name, value.clone())), channels, 0);
        }

        // Every event that reaches here is settled (no outstanding
        // handlers), regardless of whether it ever suspended a task — a
        // plain synchronous fire needs this too, or `Value::wait` (the
        // foreign-thread `fire` → `Value` contract, §6) blocks forever.
        handle.lock().data().value.inform();

        // `current`'s own `effects` counts itself (1 at fire time) plus one
        // per direct descendant it has caused; it only reaches zero once
        // every transitively-caused event has also finished. Decrementing
        // `current`'s own counter here (not the cause's) is what lets a
        // single finishing leaf cascade `complete` up through several
        // ancestor levels in one call when they all bottom out together.
        let mut current = handle;
        loop {
            let cause = current.lock().data().cause.clone();
            let Some(cause) = cause else { break };
            let effects = {
                let mut guard = current.lock();
                guard.data_mut().effects -= 1;
                guard.data().effects
            };
            if effects > 0 {
                break;
            }
            let (complete_wanted, complete_channels, cname, cvalue) = {
                let guard = current.lock();
                let data = guard.data();
                (
                    data.complete,
                    data.complete_channels.clone(),
                    data.name.clone(),
                    data.value.get(),
                )
            };
            if complete_wanted {
                let channels = complete_channels.unwrap_or_else(|| channel_of(&current));
                self.fire_boxed(Box::new(Complete::new(&cname, cvalue)), channels, 0);
            }
            current.lock().data_mut().cause = None;
            current = cause;
        }
    }

    // --- cooperative task scheduler --------------------------------------

    fn register_task(&self, event: EventHandle, task: Box<dyn CoTask>, parent: Option<TaskId>) -> TaskId {
        let id = TaskId::next();
        let mut tasks = self.state.tasks.lock();
        tasks.entries.insert(id, TaskEntry { event, task, parent });
        tasks.ready.push_back(id);
        id
    }

    fn park_task(&self, id: TaskId) {
        let mut tasks = self.state.tasks.lock();
        tasks.ready.retain(|t| *t != id);
    }

    /// Installs the dynamic handlers circuits' `waitEvent` sets up: one on
    /// the awaited event name, and (if a timeout is set) one on
    /// `generate_events` to notice expiry.
    ///
    /// circuits installs a second handler on `<name>_done` and only flips
    /// `state.flag` there, because its generator-based handler for the
    /// awaited event itself runs interleaved with that event's *other*
    /// handlers and can't yet see the final settled value. Dispatch here is
    /// fully synchronous (§5): by the time any task-scheduler code reads
    /// `state.event`'s value, `dispatch` has already run every handler for
    /// the awaited event to completion, so recording it and flipping
    /// `state.flag` directly in the one handler below observes the same
    /// final value the two-handler handshake would — the `done_<name>`
    /// handshake is therefore unnecessary here (see DESIGN.md).
    pub fn install_wait_handlers(
        &self,
        event_name: &str,
        channels: &[String],
        timeout: i64,
        state: SharedState,
    ) -> Vec<HandlerId> {
        let mut ids = Vec::new();
        let channel = channels.first().cloned();

        let st = state.clone();
        let on_event: HandlerFn = Arc::new(move |_m, ev| {
            let mut s = st.lock();
            s.event = Some(ev.clone());
            s.flag = true;
            HandlerOutcome::None
        });
        ids.push(self.add_handler(
            ComponentId::ROOT,
            event_name.to_string(),
            channel.clone(),
            0,
            false,
            true,
            on_event,
        ));

        if timeout >= 0 {
            let st3 = state.clone();
            // Tick-denominated countdown (§4.3): one `generate_events`
            // occurrence decrements it by one, matching `wait`'s contract of
            // resuming within at most `timeout` ticks even if the awaited
            // event never fires, rather than a wall-clock deadline.
            let on_tick: HandlerFn = Arc::new(move |_m, _ev| {
                let mut s = st3.lock();
                if s.timeout > 0 {
                    s.timeout -= 1;
                }
                if s.timeout <= 0 {
                    s.flag = true;
                }
                HandlerOutcome::None
            });
            ids.push(self.add_handler(
                ComponentId::ROOT,
                "generate_events",
                Some("*".into()),
                0,
                false,
                true,
                on_tick,
            ));
        }

        ids
    }

    /// Scans every parked task and re-admits the ones whose [`CoTask::is_ready`]
    /// now reports true (a wait/done/tick handler set its shared flag).
    fn wake_parked_tasks(&self) {
        let mut tasks = self.state.tasks.lock();
        let parked: Vec<TaskId> = tasks
            .entries
            .keys()
            .filter(|id| !tasks.ready.contains(id))
            .copied()
            .collect();
        for id in parked {
            if tasks.entries.get(&id).map(|e| e.task.is_ready()).unwrap_or(false) {
                tasks.ready.push_back(id);
            }
        }
    }

    /// Steps every ready task once. Mirrors circuits' `tick()` stepping
    /// `self._tasks.copy()` before the queue flush.
    fn step_tasks(&self) {
        self.wake_parked_tasks();
        let ready: Vec<TaskId> = {
            let tasks = self.state.tasks.lock();
            tasks.ready.iter().copied().collect()
        };
        for id in ready {
            self.step_task(id, None);
        }
    }

    fn step_task(&self, id: TaskId, resume: Option<JsonValue>) {
        let (event, mut task, parent) = {
            let mut tasks = self.state.tasks.lock();
            let Some(entry) = tasks.entries.remove(&id) else {
                return;
            };
            tasks.ready.retain(|t| *t != id);
            (entry.event, entry.task, entry.parent)
        };

        match task.step(self, resume) {
            StepResult::Yield(Yielded::State(_)) => {
                // First suspension: the task installed its own wait handlers
                // and is now parked until one of them reschedules it.
                let mut tasks = self.state.tasks.lock();
                tasks.entries.insert(id, TaskEntry { event, task, parent });
                self.park_task(id);
            }
            StepResult::Yield(Yielded::Nested(nested)) => {
                event.lock().data_mut().waiting_handlers += 1;
                let nested_id = self.register_task(event.clone(), nested, Some(id));
                let mut tasks = self.state.tasks.lock();
                tasks.entries.insert(id, TaskEntry { event, task, parent });
                drop(tasks);
                self.park_task(id);
                self.step_task(nested_id, None);
            }
            StepResult::Yield(Yielded::Call(value)) => {
                event.lock().data_mut().waiting_handlers -= 1;
                if let Some(parent_id) = parent {
                    self.step_task(parent_id, Some(value));
                } else {
                    if !value.is_null() {
                        event.lock().data().value.set(value);
                    }
                    self.maybe_finish(event);
                }
            }
            StepResult::Done(value) => {
                event.lock().data_mut().waiting_handlers -= 1;
                if let Some(parent_id) = parent {
                    self.step_task(parent_id, value);
                } else {
                    if let Some(v) = value {
                        event.lock().data().value.set(v);
                    }
                    self.maybe_finish(event);
                }
            }
            StepResult::Raised(err) => {
                event.lock().data_mut().waiting_handlers -= 1;
                event.lock().data().value.set_errors(true);
                let name = event.lock().name().to_string();
                self.report_handler_failure(&event, None, &format!("{}", err));
                if let Some(parent_id) = parent {
                    self.step_task(parent_id, None);
                } else {
                    self.maybe_finish(event);
                }
                let _ = name;
            }
        }
    }

    fn maybe_finish(&self, event: EventHandle) {
        let waiting = event.lock().data().waiting_handlers;
        if waiting == 0 {
            // `event_done` itself calls `value.inform()` once settled.
            self.event_done(event);
        }
    }

    // --- lifecycle --------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// One iteration of the dispatcher loop: step ready tasks, fire
    /// `generate_events` as the I/O poll hook, flush whatever is queued, then
    /// idle-wait for new work up to the configured budget. The idle wait is
    /// a condvar parked on the queue lock rather than circuits' blocking
    /// poller handler — foreign-thread fires notify it immediately, and a
    /// pending task always keeps the budget at zero so tasks get stepped
    /// every tick instead of sleeping through them.
    pub fn tick(&self) {
        self.step_tasks();
        if self.is_running() {
            let has_queue = !self.state.queue.lock().is_empty();
            let has_tasks = !self.state.tasks.lock().entries.is_empty();
            let idle = self.state.config.idle_timeout.as_millis() as i64;
            let budget = if has_queue || has_tasks { 0 } else { idle };
            self.fire(GenerateEvents::new(budget), &["*"]);
        }
        if self.state.queue.lock().len() > 0 {
            self.flush();
        }
        if self.is_running() && self.state.queue.lock().is_empty() && self.state.tasks.lock().entries.is_empty() {
            let mut q = self.state.queue.lock();
            self.state
                .queue_cv
                .wait_for(&mut q, self.state.config.idle_timeout);
        }
    }

    /// Blocking dispatcher loop. Installs SIGINT/SIGTERM handlers only when
    /// called from the main thread (a runtime check, matching circuits'
    /// `current_thread().getName() == "MainThread"`), fires `started`, loops
    /// `tick()` while running or the queue is non-empty, then drains a bounded
    /// number of extra ticks so in-flight continuations settle.
    ///
    /// Errs with [`ManagerError::Unregistrable`] if another thread is
    /// already driving this manager's tick loop: §5 mandates exactly one
    /// dispatcher thread, so a second concurrent `run()` is the single-tree
    /// analogue of circuits' "subtree whose dispatcher is already running
    /// under an already-running root".
    pub fn run(&self) -> Result<(), ManagerError> {
        {
            let mut executing = self.state.executing_thread.lock();
            if executing.is_some() {
                return Err(ManagerError::Unregistrable(ComponentId::ROOT));
            }
            *executing = Some(thread::current().id());
        }

        static SIGNAL_ONCE: Once = Once::new();
        if is_main_thread() {
            let mgr = self.clone();
            SIGNAL_ONCE.call_once(|| {
                let handler_mgr = mgr.clone();
                let _ = ctrlc::set_handler(move || {
                    handler_mgr.fire(Signal::new(2), &["*"]);
                    handler_mgr.stop();
                });
            });
        }

        self.state.running.store(true, Ordering::SeqCst);
        self.fire(Started::new(ComponentId::ROOT), &["*"]);

        while self.is_running() || self.state.queue.lock().len() > 0 {
            self.tick();
        }
        // Open Question Decision #2 (DESIGN.md): drain deterministically
        // until the queue and task set are both empty for one full tick,
        // bounded by `stop_drain_ticks` as a safety backstop rather than
        // ticking that many times unconditionally.
        for _ in 0..self.state.config.stop_drain_ticks {
            let settled =
                self.state.queue.lock().is_empty() && self.state.tasks.lock().entries.is_empty();
            if settled {
                break;
            }
            self.tick();
        }
        *self.state.executing_thread.lock() = None;
        Ok(())
    }

    /// Spawns the dispatcher loop on a background thread. Errors from
    /// `run()` (a dispatcher thread already claimed) are logged rather than
    /// propagated, matching the fire-and-forget nature of `start`.
    pub fn start(&self) -> JoinHandle<()> {
        let mgr = self.clone();
        thread::spawn(move || {
            if let Err(err) = mgr.run() {
                log::error!("dispatcher thread exiting: {}", err);
            }
        })
    }

    /// Stops the dispatcher: fires `stopped` and clears the running flag.
    /// Foreign threads may call this freely.
    pub fn stop(&self) {
        self.fire(Stopped::new(ComponentId::ROOT), &["*"]);
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// `<running=.. queued=N tid=..>`, the equivalent of circuits'
/// `Manager.__repr__` (`<Name/channel tid (queued=N) [R|S]>`).
impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("running", &self.is_running())
            .field("queued", &self.queue_len())
            .field("dispatcher_thread", &*self.state.executing_thread.lock())
            .finish()
    }
}

fn is_main_thread() -> bool {
    thread::current().name() == Some("main")
}

/// Python truthiness for a handler's JSON return value, matching circuits'
/// `if handler.filter and value:` (`manager.py:568`): `null`, `false`, `0`,
/// `""`, and empty arrays/objects are falsy; everything else is truthy.
fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GenericEvent;
    use crate::scheduler::{CallTask, WaitTask};
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, AtomicUsize};
    use std::time::{Duration, Instant};

    fn new_mgr() -> Manager {
        Manager::new(ManagerConfig::default())
    }

    /// S1 — basic fire: one handler, value observable after flush.
    #[test]
    fn s1_basic_fire_runs_handler_once() {
        let mgr = new_mgr();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "foo",
            None,
            0,
            false,
            false,
            Arc::new(move |_m, _ev| {
                calls2.fetch_add(1, Ordering::SeqCst);
                HandlerOutcome::Value(json!("A.foo"))
            }),
        );

        let value = mgr.fire(GenericEvent::new("foo"), &["*"]);
        mgr.flush();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(value.get(), Some(json!("A.foo")));
        assert!(
            value.is_settled(),
            "a plain synchronous fire must settle its Value even with no suspended task, \
             or a foreign thread's Value::wait() would block forever"
        );
    }

    /// S2 — a filter handler at higher priority stops lower-priority
    /// handlers for the same event from running at all.
    #[test]
    fn s2_filter_handler_short_circuits_lower_priority() {
        let mgr = new_mgr();
        let h2_called = Arc::new(AtomicBool::new(false));
        let h2c = h2_called.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "ping",
            None,
            1,
            false,
            false,
            Arc::new(move |_m, _ev| {
                h2c.store(true, Ordering::SeqCst);
                HandlerOutcome::None
            }),
        );
        mgr.add_handler(
            ComponentId::ROOT,
            "ping",
            None,
            10,
            true,
            false,
            Arc::new(|_m, _ev| HandlerOutcome::Value(json!(true))),
        );

        mgr.fire(GenericEvent::new("ping"), &["*"]);
        mgr.flush();

        assert!(!h2_called.load(Ordering::SeqCst), "lower-priority handler must not run after a truthy filter");
    }

    /// A filter handler gates on its *own* return value being truthy, not on
    /// whether some earlier handler already set the event's accumulated
    /// value. An earlier handler sets a value; the filter handler returns a
    /// falsy value (`false`); the lower-priority handler must still run.
    #[test]
    fn filter_handler_returning_falsy_does_not_short_circuit() {
        let mgr = new_mgr();
        let h3_called = Arc::new(AtomicBool::new(false));
        let h3c = h3_called.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "ping",
            None,
            20,
            false,
            false,
            Arc::new(|_m, _ev| HandlerOutcome::Value(json!("earlier value"))),
        );
        mgr.add_handler(
            ComponentId::ROOT,
            "ping",
            None,
            10,
            true,
            false,
            Arc::new(|_m, _ev| HandlerOutcome::Value(json!(false))),
        );
        mgr.add_handler(
            ComponentId::ROOT,
            "ping",
            None,
            1,
            false,
            false,
            Arc::new(move |_m, _ev| {
                h3c.store(true, Ordering::SeqCst);
                HandlerOutcome::None
            }),
        );

        mgr.fire(GenericEvent::new("ping"), &["*"]);
        mgr.flush();

        assert!(
            h3_called.load(Ordering::SeqCst),
            "a falsy filter return must not short-circuit lower-priority handlers"
        );
    }

    /// S3 — success/complete cascade. `success` only requires the
    /// requesting event's own handler loop to finish (§4.4 step 3, matching
    /// circuits' `_eventDone`), so it fires before the fanned-out
    /// grandchildren even though `complete` — which tracks the whole
    /// causal subtree — only fires once they have too.
    #[test]
    fn s3_success_and_complete_cascade() {
        let mgr = new_mgr();
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let success_count = Arc::new(AtomicUsize::new(0));
        let complete_count = Arc::new(AtomicUsize::new(0));

        let log1 = log.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "root_ev",
            Some("app".to_string()),
            0,
            false,
            false,
            Arc::new(move |m, _ev| {
                log1.lock().push("root");
                m.fire(GenericEvent::new("c1"), &["app"]);
                m.fire(GenericEvent::new("c2"), &["app"]);
                HandlerOutcome::None
            }),
        );
        let log2 = log.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "c1",
            Some("app".to_string()),
            0,
            false,
            false,
            Arc::new(move |m, _ev| {
                log2.lock().push("c1");
                m.fire(GenericEvent::new("g1"), &["app"]);
                HandlerOutcome::None
            }),
        );
        let log3 = log.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "c2",
            Some("app".to_string()),
            0,
            false,
            false,
            Arc::new(move |m, _ev| {
                log3.lock().push("c2");
                m.fire(GenericEvent::new("g2"), &["app"]);
                HandlerOutcome::None
            }),
        );
        let log4 = log.clone();
        mgr.add_handler(ComponentId::ROOT, "g1", Some("app".to_string()), 0, false, false, Arc::new(move |_m, _ev| {
            log4.lock().push("g1");
            HandlerOutcome::None
        }));
        let log5 = log.clone();
        mgr.add_handler(ComponentId::ROOT, "g2", Some("app".to_string()), 0, false, false, Arc::new(move |_m, _ev| {
            log5.lock().push("g2");
            HandlerOutcome::None
        }));

        let log6 = log.clone();
        let sc = success_count.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "success_root_ev",
            Some("x".to_string()),
            0,
            false,
            false,
            Arc::new(move |_m, _ev| {
                sc.fetch_add(1, Ordering::SeqCst);
                log6.lock().push("success");
                HandlerOutcome::None
            }),
        );
        let log7 = log.clone();
        let cc = complete_count.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "complete_root_ev",
            Some("app".to_string()),
            0,
            false,
            false,
            Arc::new(move |_m, _ev| {
                cc.fetch_add(1, Ordering::SeqCst);
                log7.lock().push("complete");
                HandlerOutcome::None
            }),
        );

        let mut root_ev = GenericEvent::new("root_ev");
        root_ev.data.success = true;
        root_ev.data.complete = true;
        root_ev.data.success_channels = Some(vec!["x".to_string()]);
        mgr.fire(root_ev, &["app"]);

        for _ in 0..10 {
            if mgr.queue_len() == 0 {
                break;
            }
            mgr.flush();
        }

        assert_eq!(success_count.load(Ordering::SeqCst), 1, "success must fire exactly once");
        assert_eq!(complete_count.load(Ordering::SeqCst), 1, "complete must fire exactly once");
        assert_eq!(
            *log.lock(),
            vec!["root", "c1", "c2", "success", "g1", "g2", "complete"]
        );
    }

    /// S4 — a handler suspends via `call`, the scheduler steps it to
    /// completion, and the observed result flows back into both the
    /// handler's continuation and the awaited event's own value.
    #[test]
    fn s4_call_resumes_with_observed_value() {
        let mgr = new_mgr();
        mgr.add_handler(
            ComponentId::ROOT,
            "kickoff",
            None,
            0,
            false,
            false,
            Arc::new(|_m, _ev| {
                let task = CallTask::new(Box::new(GenericEvent::new("task_x")), vec!["*".to_string()], -1);
                HandlerOutcome::Suspend(Box::new(task))
            }),
        );
        mgr.add_handler(ComponentId::ROOT, "task_x", None, 0, false, false, Arc::new(|_m, _ev| {
            HandlerOutcome::Value(json!(42))
        }));

        let value = mgr.fire(GenericEvent::new("kickoff"), &["*"]);
        for _ in 0..10 {
            mgr.step_tasks();
            if mgr.queue_len() > 0 {
                mgr.flush();
            }
            if value.is_settled() {
                break;
            }
        }

        assert!(value.is_settled(), "kickoff's value should settle once the task finishes");
        assert_eq!(value.get(), Some(json!(42)));
    }

    /// S5 — one handler raising does not prevent the others from running,
    /// and is reported through `failure`/`error`.
    #[test]
    fn s5_handler_panic_is_isolated() {
        let mgr = new_mgr();
        let ran = Arc::new(AtomicUsize::new(0));
        let r1 = ran.clone();
        mgr.add_handler(ComponentId::ROOT, "boom", None, 2, false, false, Arc::new(move |_m, _ev| {
            r1.fetch_add(1, Ordering::SeqCst);
            panic!("ValueError: kaboom");
        }));
        let r2 = ran.clone();
        mgr.add_handler(ComponentId::ROOT, "boom", None, 1, false, false, Arc::new(move |_m, _ev| {
            r2.fetch_add(1, Ordering::SeqCst);
            HandlerOutcome::None
        }));
        let r3 = ran.clone();
        mgr.add_handler(ComponentId::ROOT, "boom", None, 0, false, false, Arc::new(move |_m, _ev| {
            r3.fetch_add(1, Ordering::SeqCst);
            HandlerOutcome::None
        }));
        let failures = Arc::new(AtomicUsize::new(0));
        let f1 = failures.clone();
        mgr.add_handler(ComponentId::ROOT, "failure_boom", Some("*".into()), 0, false, false, Arc::new(move |_m, _ev| {
            f1.fetch_add(1, Ordering::SeqCst);
            HandlerOutcome::None
        }));

        let mut ev = GenericEvent::new("boom");
        ev.data.success = true; // irrelevant here except to exercise the errors-suppress-success path
        let value = mgr.fire(ev, &["*"]);
        mgr.flush();
        // the failure/error events queued by the panicking handler need one
        // more flush to run.
        mgr.flush();

        assert_eq!(ran.load(Ordering::SeqCst), 3, "all three handlers must still run");
        assert!(value.errors(), "errors flag must be set after a handler panic");
        assert_eq!(failures.load(Ordering::SeqCst), 1, "failure must fire exactly once");
    }

    /// Invariant 7 — `wait(timeout=N)` resumes within N `generate_events`
    /// ticks even if the awaited event never fires.
    #[test]
    fn wait_times_out_after_n_ticks() {
        let mgr = new_mgr();
        let resumed_null = Arc::new(AtomicBool::new(false));
        let rn = resumed_null.clone();
        mgr.add_handler(
            ComponentId::ROOT,
            "starter",
            None,
            0,
            false,
            false,
            Arc::new(move |_m, _ev| {
                HandlerOutcome::Suspend(Box::new(WaitTask::new("never_fires", vec!["*".to_string()], 2)))
            }),
        );

        let value = mgr.fire(GenericEvent::new("starter"), &["*"]);
        mgr.flush();

        for _ in 0..5 {
            // Each generate_events tick decrements the wait's timeout.
            mgr.fire(GenerateEvents::new(0), &["*"]);
            mgr.flush();
            mgr.step_tasks();
            if value.is_settled() {
                break;
            }
        }

        assert!(value.is_settled(), "wait must resume once its timeout is exhausted");
        let _ = rn;
    }

    /// S6 — a foreign-thread fire wakes an idling dispatcher well under its
    /// configured idle budget.
    #[test]
    fn s6_foreign_fire_wakes_idle_dispatcher() {
        let mut cfg = ManagerConfig::default();
        cfg.idle_timeout = Duration::from_millis(300);
        let mgr = new_mgr_with(cfg);

        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        mgr.add_handler(ComponentId::ROOT, "ping", None, 0, false, false, Arc::new(move |_m, _ev| {
            seen2.store(true, Ordering::SeqCst);
            HandlerOutcome::None
        }));

        let handle = mgr.start();
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        mgr.fire(GenericEvent::new("ping"), &["*"]);
        while !seen.load(Ordering::SeqCst) && start.elapsed() < Duration::from_millis(250) {
            thread::sleep(Duration::from_millis(1));
        }
        let elapsed = start.elapsed();

        mgr.stop();
        handle.join().unwrap();

        assert!(seen.load(Ordering::SeqCst), "handler should have run");
        assert!(
            elapsed < Duration::from_millis(250),
            "dispatcher should wake well under the 300ms idle budget, took {:?}",
            elapsed
        );
    }

    fn new_mgr_with(config: ManagerConfig) -> Manager {
        Manager::new(config)
    }

    #[test]
    fn contains_reflects_registration() {
        let mgr = new_mgr();
        assert!(mgr.contains(ComponentId::ROOT));
        let child = mgr.register_component(ComponentId::ROOT, Some("child".to_string())).unwrap();
        assert!(mgr.contains(child));
        mgr.unregister_component(child);
        assert!(!mgr.contains(child));
    }

    #[test]
    fn register_component_rejects_unknown_parent() {
        let mgr = new_mgr();
        let bogus = ComponentId::new();
        let err = mgr.register_component(bogus, None).unwrap_err();
        assert!(matches!(err, ManagerError::UnknownComponent(_)));
    }

    #[test]
    fn reduce_time_left_never_increases() {
        let ge = GenerateEvents::new(100);
        ge.reduce_time_left(20);
        assert_eq!(ge.time_left(), 20);
        ge.reduce_time_left(50);
        assert_eq!(ge.time_left(), 20);
        let _ = AtomicI32::new(0);
    }
}
