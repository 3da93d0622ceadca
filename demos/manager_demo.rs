//! Minimal standalone demo of the dispatcher: registers a couple of
//! handlers, starts the manager on a background thread, fires events from
//! the main thread, then stops it. Analogous in spirit to the teacher's
//! `src/bin/server.rs` (an ambient-stack binary, not part of the library
//! surface) but driving the event core directly instead of an HTTP server.

use conduit::{ComponentId, GenericEvent, HandlerOutcome, Manager, ManagerConfig};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();

    let mgr = Manager::new(ManagerConfig::default());
    mgr.add_handler(
        ComponentId::ROOT,
        "greet",
        None,
        0,
        false,
        false,
        Arc::new(|_m, ev| {
            let who = ev.lock().data().args.first().cloned();
            log::info!("greet fired with {:?}", who);
            HandlerOutcome::Value(serde_json::json!("hello"))
        }),
    );

    let handle = mgr.start();
    std::thread::sleep(Duration::from_millis(20));

    let value = mgr.fire(
        GenericEvent::new("greet").with_args(vec![serde_json::json!("world")]),
        &["*"],
    );
    value.wait();
    println!("greet returned: {:?}", value.get());

    mgr.stop();
    handle.join().expect("dispatcher thread panicked");
}
