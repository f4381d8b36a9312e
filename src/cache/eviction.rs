//! Eviction policies for the write-back cache.
//!
//! A policy only ever sees clean entries: the cache filters out anything still
//! waiting to be flushed before asking [`EvictionPolicy::should_evict`].

use crate::clock::Clock;
use crate::config::Eviction;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub trait EvictionPolicy: Send + Sync {
    /// Called on every cache read that returns a value.
    fn note_get(&self, key: &str, col: u64);

    /// Called on every cache write.
    fn note_put(&self, key: &str, col: u64);

    fn should_evict(&self, key: &str, col: u64) -> bool;

    /// Forget everything recorded for an entry that left the cache.
    fn remove(&self, key: &str, col: u64);
}

/// Builds the policy selected by `eviction`.
pub fn policy(eviction: Eviction, clock: Arc<dyn Clock>) -> Box<dyn EvictionPolicy> {
    match eviction {
        Eviction::Never => Box::new(NeverEvict),
        Eviction::Always => Box::new(AlwaysEvict),
        Eviction::LastRead(age) => Box::new(EvictByAge::new(
            Access::Read,
            age.as_millis() as u64,
            clock,
        )),
        Eviction::LastWrite(age) => Box::new(EvictByAge::new(
            Access::Write,
            age.as_millis() as u64,
            clock,
        )),
    }
}

pub struct NeverEvict;

impl EvictionPolicy for NeverEvict {
    fn note_get(&self, _key: &str, _col: u64) {}

    fn note_put(&self, _key: &str, _col: u64) {}

    fn should_evict(&self, _key: &str, _col: u64) -> bool {
        false
    }

    fn remove(&self, _key: &str, _col: u64) {}
}

pub struct AlwaysEvict;

impl EvictionPolicy for AlwaysEvict {
    fn note_get(&self, _key: &str, _col: u64) {}

    fn note_put(&self, _key: &str, _col: u64) {}

    fn should_evict(&self, _key: &str, _col: u64) -> bool {
        true
    }

    fn remove(&self, _key: &str, _col: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Evicts entries whose last tracked access is at least `age` old. Entries
/// with no tracked access at all (a written entry under a read policy, a
/// fetched entry under a write policy) are evicted as soon as they are clean.
pub struct EvictByAge {
    tracks: Access,
    age: u64,
    clock: Arc<dyn Clock>,
    accessed: Mutex<HashMap<(String, u64), u64>>,
}

impl EvictByAge {
    fn new(tracks: Access, age: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracks,
            age,
            clock,
            accessed: Mutex::new(HashMap::new()),
        }
    }

    fn touch(&self, key: &str, col: u64) {
        let now = self.clock.now();
        self.accessed
            .lock()
            .unwrap()
            .insert((key.to_string(), col), now);
    }
}

impl EvictionPolicy for EvictByAge {
    fn note_get(&self, key: &str, col: u64) {
        if self.tracks == Access::Read {
            self.touch(key, col);
        }
    }

    fn note_put(&self, key: &str, col: u64) {
        if self.tracks == Access::Write {
            self.touch(key, col);
        }
    }

    fn should_evict(&self, key: &str, col: u64) -> bool {
        let now = self.clock.now();
        match self.accessed.lock().unwrap().get(&(key.to_string(), col)) {
            Some(last) => now.saturating_sub(*last) >= self.age,
            None => true,
        }
    }

    fn remove(&self, key: &str, col: u64) {
        self.accessed.lock().unwrap().remove(&(key.to_string(), col));
    }
}
