//! Manager-wide configuration, modeled on the teacher's `EventContextConfig`
//! (see `src/events/event_context.rs` in the reference pack): a small `Default`-able
//! struct plus a process-wide fallback reachable without threading a config value
//! through every call site.

use once_cell::sync::Lazy;
use std::time::Duration;

/// What to do when the dispatcher finds no handler at all for a fired event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnhandledEventLevel {
    /// Log a warning (default; mirrors circuits' `UnhandledEventWarning`).
    Warn,
    /// Do nothing.
    Silent,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManagerConfig {
    /// Idle poll budget for `generate_events` when no task and no queued
    /// event needs immediate attention. Foreign-thread fires reduce this to
    /// zero to wake the dispatcher early.
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,
    /// Extra ticks pumped by `stop()` after the queue and task set both go
    /// empty once, bounding how long shutdown drains pending continuations.
    pub stop_drain_ticks: usize,
    pub unhandled_event_level: UnhandledEventLevel,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            idle_timeout: Duration::from_millis(100),
            stop_drain_ticks: 3,
            unhandled_event_level: UnhandledEventLevel::Warn,
        }
    }
}

pub static DEFAULT_CONFIG: Lazy<ManagerConfig> = Lazy::new(ManagerConfig::default);

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_circuits_timeout() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.idle_timeout, Duration::from_millis(100));
        assert_eq!(cfg.unhandled_event_level, UnhandledEventLevel::Warn);
    }
}
