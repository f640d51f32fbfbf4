use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::clock::Clock;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CAPACITY: usize = 100;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Concurrent cache with a fixed time-to-live and a capacity bound.
///
/// Entries older than the TTL are dropped when read. When an insert takes the
/// cache past its capacity, the entry with the oldest insertion time is evicted
/// regardless of whether it has expired. Concurrent inserts never leave the
/// cache holding more than `capacity` entries once they return.
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    next_seq: AtomicU64,
    // Serializes eviction so overlapping inserts cannot pick the same victim.
    evicting: Mutex<()>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl,
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(0),
            evicting: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, DEFAULT_TTL, DEFAULT_CAPACITY)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let expired = |entry: &CacheEntry<V>| now.saturating_duration_since(entry.inserted_at) > self.ttl;

        if let Some(entry) = self.entries.get(key) {
            if !expired(entry.value()) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        self.entries.remove_if(key, |_, entry| expired(entry));
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(key.clone(), entry);

        if self.entries.len() <= self.capacity {
            return;
        }
        let _guard = self.evicting.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while self.entries.len() > self.capacity {
            if !self.evict_oldest(&key) {
                break;
            }
        }
    }

    fn evict_oldest(&self, keep: &str) -> bool {
        let victim = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| (entry.inserted_at, entry.seq))
            .map(|entry| entry.key().clone());

        match victim {
            Some(victim) => {
                self.entries.remove(&victim);
                tracing::debug!(key = %victim, "evicted oldest cache entry");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
