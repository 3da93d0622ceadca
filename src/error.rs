//! Error types for the dispatch core.
//!
//! Handler panics are never turned into `Result`s: per the sequential dispatch
//! model a panicking handler is caught with [`std::panic::catch_unwind`] at the
//! call site and reported through the `failure`/`error` derived events instead.
//! These types cover everything else: registration misuse, lock poisoning, and
//! the cooperative task scheduler's own failure channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("component already has a dispatcher thread claimed: {0:?}")]
    Unregistrable(crate::component::ComponentId),

    #[error("component {0:?} is not registered with this manager")]
    UnknownComponent(crate::component::ComponentId),

    #[error("handler {0:?} is not registered")]
    UnknownHandler(crate::handler::HandlerId),

    #[error("internal lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("signal handler installation failed: {0}")]
    Signal(#[from] ctrlc::Error),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}
