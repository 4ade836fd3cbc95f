//! Clock abstraction so the processor and enqueuer never call `Utc::now()` directly,
//! which keeps backoff and lease expiry deterministic in tests.

use chrono::{DateTime, Utc};

/// `now() -> instant (UTC)`. All timestamps in the engine use UTC.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
