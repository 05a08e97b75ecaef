//! Dependency injection traits.
//!
//! All external dependencies are abstracted behind traits and injected
//! via the Environment parameter of a reducer.

use chrono::{DateTime, Utc};

/// Clock trait: abstracts time operations for testability.
///
/// Production code uses [`SystemClock`]; tests use a fixed clock so that
/// sale windows, scan heuristics, and expiry logic are deterministic.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
