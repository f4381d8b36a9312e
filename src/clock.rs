//! Time source for age-based eviction and lock-state expiry.
//!
//! Times are milliseconds. `SystemClock` reports wall time since the Unix
//! epoch so values written into a shared store are comparable across
//! processes (modulo clock skew). `ManualClock` only moves when told to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct ManualClock {
    time: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            time: AtomicU64::new(start),
        }
    }

    pub fn set(&self, time: u64) {
        self.time.store(time, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.time.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}
