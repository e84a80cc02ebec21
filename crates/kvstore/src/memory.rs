use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Entry {
    value: String,
    expires: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Process-local store with the subset of redis semantics the gateway
/// relies on: string values, counters, and per-key expiry.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Adjust the counter at `key` by `delta`, resetting its expiry.
    /// An absent or expired key counts from zero, as redis INCR does.
    pub fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry
                .value
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("value at {key} is not an integer"))?,
            _ => 0,
        };

        let updated = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: updated.to_string(),
                expires: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(updated)
    }
}
