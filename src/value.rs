//! `Value`: the settle-once box attached to every fired event, returned to the
//! caller of `fire`/`call` as a handle onto whatever the handler chain
//! eventually produces. Grounded on circuits' `Value` object (`manager.py`
//! constructs one per fire: `event.value = Value(event, self)`); the notify
//! flag and `inform()` call are circuits' generator-completion signal, here
//! just a condvar wakeup for any thread blocked in [`Value::wait`].

use parking_lot::{Condvar, Mutex};
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    value: Option<JsonValue>,
    errors: bool,
    /// Set once a handler returned a lazy sequence instead of a plain value;
    /// the eventual value arrives asynchronously via task stepping.
    promise: bool,
    settled: bool,
}

/// Shared handle onto an event's eventual result.
///
/// Cloning a `Value` aliases the same underlying cell (`Arc`), matching the
/// single shared object circuits attaches to `event.value`.
#[derive(Debug, Clone)]
pub struct Value {
    inner: Arc<Mutex<Inner>>,
    condvar: Arc<Condvar>,
}

impl Value {
    pub fn new() -> Self {
        Value {
            inner: Arc::new(Mutex::new(Inner::default())),
            condvar: Arc::new(Condvar::new()),
        }
    }

    pub fn set(&self, value: JsonValue) {
        let mut inner = self.inner.lock();
        inner.value = Some(value);
    }

    pub fn get(&self) -> Option<JsonValue> {
        self.inner.lock().value.clone()
    }

    pub fn set_errors(&self, errors: bool) {
        self.inner.lock().errors = errors;
    }

    pub fn errors(&self) -> bool {
        self.inner.lock().errors
    }

    pub fn set_promise(&self, promise: bool) {
        self.inner.lock().promise = promise;
    }

    pub fn is_promise(&self) -> bool {
        self.inner.lock().promise
    }

    /// Marks the value settled and wakes any thread parked in `wait`.
    /// Mirrors circuits' `Value.inform(True)`.
    pub fn inform(&self) {
        let mut inner = self.inner.lock();
        inner.settled = true;
        self.condvar.notify_all();
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().settled
    }

    /// Blocks the calling thread until `inform` is called. For use by foreign
    /// threads awaiting the outcome of a `fire` issued across the queue lock;
    /// never call this from the dispatcher thread itself.
    pub fn wait(&self) {
        let mut inner = self.inner.lock();
        while !inner.settled {
            self.condvar.wait(&mut inner);
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_informed() {
        let v = Value::new();
        let v2 = v.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            v2.set(serde_json::json!(42));
            v2.inform();
        });
        v.wait();
        assert_eq!(v.get(), Some(serde_json::json!(42)));
        handle.join().unwrap();
    }
}
