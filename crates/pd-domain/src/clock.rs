//! Injectable wall-clock.
//!
//! Freshness checks, market-closed detection, and TTL accounting all hang
//! off "now". Production code uses [`SystemClock`]; tests pin time with
//! [`FixedClock`].

use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a settable instant. Test-only in spirit, but shipped
/// here so every downstream crate's tests can share it.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FixedClock { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock poisoned") = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().expect("clock poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}
