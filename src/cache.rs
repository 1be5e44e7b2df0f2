//! Time-windowed caches for gate decisions and codebase scans.
//!
//! Caches are plain values owned by whoever needs them, stamped with a
//! [`Clock`] that tests can drive by hand.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut guard = match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone)]
struct Stamped<K, V> {
    key: K,
    value: V,
    stored_at: Instant,
}

/// Single-slot cache: one key, one value, one validity window.
#[derive(Debug)]
pub struct TimedCache<K, V> {
    ttl: Duration,
    slot: Option<Stamped<K, V>>,
}

impl<K: PartialEq, V: Clone> TimedCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: None }
    }

    /// Cached value for `key` if it is still inside the window.
    pub fn get(&self, key: &K, now: Instant) -> Option<V> {
        let slot = self.slot.as_ref()?;
        if slot.key != *key {
            return None;
        }
        if now.saturating_duration_since(slot.stored_at) >= self.ttl {
            return None;
        }
        Some(slot.value.clone())
    }

    pub fn put(&mut self, key: K, value: V, now: Instant) {
        self.slot = Some(Stamped {
            key,
            value,
            stored_at: now,
        });
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}
