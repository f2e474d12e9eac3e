//! Time sources for rate state.
//!
//! Token refill reads the monotonic clock; quota periods read the UTC wall
//! clock. Both go through [`Clock`] so tests can drive time by hand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic reading used for token refill.
    fn now(&self) -> Instant;

    /// Wall-clock reading used for quota periods.
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(wall_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        self.wall_origin + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::MAX)
    }
}
