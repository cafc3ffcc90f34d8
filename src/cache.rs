// =============================================================================
// Short-TTL caches for the analysis loop
// =============================================================================
//
// A `TtlCache` holds one value with an expiry; a `TtlMap` holds one value per
// key (used for kline batches keyed by interval and limit). Expired entries
// read as `None`; the analysis loop treats a miss as "fetch again", and a
// fetch failure on a miss skips the iteration.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

pub struct TtlCache<T: Clone> {
    slot: RwLock<Option<(Instant, T)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
        }
    }

    pub fn put(&self, value: T) {
        *self.slot.write() = Some((Instant::now(), value));
    }

    /// The cached value, if it has not expired.
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.read();
        match slot.as_ref() {
            Some((stored, value)) if stored.elapsed() <= self.ttl => Some(value.clone()),
            _ => None,
        }
    }
}

pub struct TtlMap<K: Eq + Hash + Clone, V: Clone> {
    entries: RwLock<HashMap<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlMap<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.entries.write().insert(key, (Instant::now(), value));
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some((stored, value)) if stored.elapsed() <= self.ttl => Some(value.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_value_is_served() {
        let cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());
        cache.put(42);
        assert_eq!(cache.get(), Some(42));
    }

    #[test]
    fn expired_value_reads_none() {
        let cache = TtlCache::new(Duration::from_millis(0));
        cache.put(7);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn map_entries_are_independent() {
        let map: TtlMap<&str, i32> = TtlMap::new(Duration::from_secs(60));
        map.put("a", 1);
        map.put("b", 2);
        assert_eq!(map.get(&"a"), Some(1));
        assert_eq!(map.get(&"b"), Some(2));
        assert_eq!(map.get(&"c"), None);
    }

    #[test]
    fn map_expiry() {
        let map: TtlMap<&str, i32> = TtlMap::new(Duration::from_millis(0));
        map.put("a", 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(map.get(&"a"), None);
    }
}
