use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_STRIPES: usize = 64;

/// Fixed array of mutexes; a key always maps to the same stripe, so holding a
/// key's stripe excludes every other holder of that key. Unrelated keys may
/// share a stripe and briefly wait on each other.
#[derive(Debug)]
pub struct StripedLock {
    stripes: Vec<Mutex<()>>,
}

impl StripedLock {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let stripe = &self.stripes[self.stripe(key)];
        // The guarded unit carries no data, so a poisoned stripe is still usable.
        stripe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stripe(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

impl Default for StripedLock {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
