//! Lossy per-key rate limit.
//!
//! An event is admitted only if no event for the same key was admitted within
//! the window. Rejected events are dropped, not queued.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Throttle<K> {
    window: Duration,
    last_admitted: HashMap<K, Instant>,
}

impl<K: Hash + Eq + Clone> Throttle<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_admitted: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and records the event if it falls outside the window.
    pub fn admit(&mut self, key: &K) -> bool {
        let now = Instant::now();
        match self.last_admitted.get(key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                self.last_admitted.insert(key.clone(), now);
                true
            }
        }
    }

    pub fn forget(&mut self, key: &K) {
        self.last_admitted.remove(key);
    }
}
