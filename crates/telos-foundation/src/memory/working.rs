//! Working memory — a bounded LRU key/value map with per-entry TTL.

use std::collections::HashMap;

use telos_kernel::memory::WorkingEntry;

/// LRU key/value store for context reassembly during a cycle.
///
/// Capacity-bounded: inserting into a full map evicts the least recently
/// used entry. Expired entries are dropped lazily on read and swept on
/// insert.
#[derive(Debug)]
pub struct WorkingMemory {
    entries: HashMap<String, Slot>,
    capacity: usize,
    /// Monotonic use-stamp; the lowest stamp is the LRU victim.
    tick: u64,
}

#[derive(Debug)]
struct Slot {
    entry: WorkingEntry,
    last_used: u64,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1_024)),
            capacity: capacity.max(1),
            tick: 0,
        }
    }

    /// Insert or replace an entry. `ttl_ms` of `None` means no expiry.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_ms: Option<u64>,
        now_millis: u64,
    ) {
        self.sweep_expired(now_millis);
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.tick += 1;
        let entry = WorkingEntry {
            key: key.clone(),
            value,
            expires_at: ttl_ms.map(|t| now_millis.saturating_add(t)),
        };
        self.entries.insert(
            key,
            Slot {
                entry,
                last_used: self.tick,
            },
        );
    }

    /// Fetch a value, refreshing its recency. Expired entries are removed.
    pub fn get(&mut self, key: &str, now_millis: u64) -> Option<serde_json::Value> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|s| s.entry.is_expired(now_millis));
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|slot| {
            slot.last_used = tick;
            slot.entry.value.clone()
        })
    }

    /// Peek without touching recency. Used by context summaries.
    pub fn peek(&self, key: &str, now_millis: u64) -> Option<&serde_json::Value> {
        self.entries
            .get(key)
            .filter(|s| !s.entry.is_expired(now_millis))
            .map(|s| &s.entry.value)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live keys, unsorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    fn sweep_expired(&mut self, now_millis: u64) {
        self.entries.retain(|_, s| !s.entry.is_expired(now_millis));
    }

    fn evict_lru(&mut self) {
        if let Some(victim) = self
            .entries
            .iter()
            .min_by_key(|(_, s)| s.last_used)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capacity_is_never_exceeded() {
        let mut mem = WorkingMemory::new(3);
        for i in 0..10 {
            mem.put(format!("k{i}"), json!(i), None, 0);
            assert!(mem.len() <= 3);
        }
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut mem = WorkingMemory::new(2);
        mem.put("a", json!(1), None, 0);
        mem.put("b", json!(2), None, 0);
        // touch "a" so "b" becomes the victim
        mem.get("a", 0);
        mem.put("c", json!(3), None, 0);
        assert!(mem.peek("a", 0).is_some());
        assert!(mem.peek("b", 0).is_none());
        assert!(mem.peek("c", 0).is_some());
    }

    #[test]
    fn ttl_expiry_on_read() {
        let mut mem = WorkingMemory::new(8);
        mem.put("k", json!("v"), Some(100), 1_000);
        assert_eq!(mem.get("k", 1_099), Some(json!("v")));
        assert_eq!(mem.get("k", 1_100), None);
        assert_eq!(mem.len(), 0);
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let mut mem = WorkingMemory::new(2);
        mem.put("a", json!(1), None, 0);
        mem.put("b", json!(2), None, 0);
        mem.put("a", json!(10), None, 0);
        assert_eq!(mem.len(), 2);
        assert_eq!(mem.peek("a", 0), Some(&json!(10)));
    }
}
