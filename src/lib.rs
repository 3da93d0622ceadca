//! conduit: a hierarchical, channel-addressed event dispatch framework.
//!
//! A single dispatcher ([`manager::Manager`]) owns a component tree, a
//! handler registry, a priority event queue, and a cooperative task
//! scheduler. Components register handlers against event names and
//! channels; firing an event resolves and runs matching handlers in
//! priority order, tracks causal completion (`done`/`success`/`complete`),
//! and lets a handler suspend itself via `wait`/`call` instead of blocking
//! the dispatcher thread.
//!
//! Grounded throughout on `circuits.core` (`hugovk/circuits`): see
//! `DESIGN.md` for the module-by-module mapping and the departures Rust's
//! ownership model forced.

pub mod component;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod value;

pub use component::ComponentId;
pub use config::{ManagerConfig, UnhandledEventLevel, DEFAULT_CONFIG};
pub use error::{ManagerError, TaskError};
pub use events::{
    Complete, Done, Event, EventData, EventHandle, ErrorEvent, Failure, GenerateEvents,
    GenericEvent, LiteralEvent, Registered, Signal, Started, Stopped, Success, Unregistered,
};
pub use handler::{HandlerFn, HandlerId, HandlerOutcome};
pub use manager::Manager;
pub use scheduler::{CallTask, CoTask, StepResult, TaskId, WaitTask, Yielded};
pub use value::Value;
