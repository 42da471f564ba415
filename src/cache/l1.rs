//! L1 Cache (§4.4) — bounded in-process LRU with an aggregate memory cap.
//!
//! Grounded on the hand-rolled `DashMap<K, CacheEntry<V>>` + access-order
//! `Vec<K>` LRU pattern used for the multi-tier cache in the teacher repo,
//! generalized here to a single tier gated by both entry count and byte size.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    size: usize,
}

/// Bounded LRU cache keyed by `String` (cache keys are already strings).
/// All operations are atomic with respect to each other via a single mutex
/// guarding the access-order list; the map itself is a `DashMap` for
/// lock-free reads of individual entries.
pub struct L1Cache {
    capacity: usize,
    memory_cap_bytes: usize,
    entries: DashMap<String, Entry>,
    order: Arc<Mutex<Vec<String>>>,
    memory_used: Arc<Mutex<usize>>,
}

impl L1Cache {
    pub fn new(capacity: usize, memory_cap_bytes: usize) -> Self {
        Self {
            capacity,
            memory_cap_bytes,
            entries: DashMap::new(),
            order: Arc::new(Mutex::new(Vec::new())),
            memory_used: Arc::new(Mutex::new(0)),
        }
    }

    fn touch(&self, key: &str) {
        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|k| k == key) {
            let k = order.remove(pos);
            order.push(k);
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            self.touch(key);
        }
        value
    }

    /// Stores `value`; `size` overrides the structural size estimate when supplied.
    pub fn set(&self, key: &str, value: Vec<u8>, size: Option<usize>) {
        let size = size.unwrap_or_else(|| estimate_size(&value));

        if let Some(old) = self.entries.get(key) {
            let mut used = self.memory_used.lock();
            *used = used.saturating_sub(old.size);
        }

        self.evict_until_fits(size);

        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                size,
            },
        );
        {
            let mut order = self.order.lock();
            order.retain(|k| k != key);
            order.push(key.to_string());
        }
        *self.memory_used.lock() += size;
    }

    fn evict_until_fits(&self, incoming_size: usize) {
        loop {
            let count = self.entries.len();
            let used = *self.memory_used.lock();
            let over_count = count >= self.capacity;
            let over_memory = used + incoming_size > self.memory_cap_bytes;
            if !over_count && !over_memory {
                break;
            }
            let lru_key = {
                let order = self.order.lock();
                order.first().cloned()
            };
            match lru_key {
                Some(k) => self.delete(&k),
                None => break,
            }
        }
    }

    pub fn delete(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            let mut used = self.memory_used.lock();
            *used = used.saturating_sub(entry.size);
        }
        self.order.lock().retain(|k| k != key);
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
        *self.memory_used.lock() = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stable, cheap structural size estimate used when the caller doesn't supply one.
fn estimate_size(value: &[u8]) -> usize {
    value.len() + 48
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_eviction_order() {
        let cache = L1Cache::new(2, 1_000_000);
        cache.set("k1", b"a".to_vec(), None);
        cache.set("k2", b"b".to_vec(), None);
        cache.get("k1"); // k1 is now MRU, k2 is LRU
        cache.set("k3", b"c".to_vec(), None); // evicts k2
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k2").is_none());
        assert!(cache.get("k3").is_some());
    }

    #[test]
    fn memory_cap_enforced() {
        let cache = L1Cache::new(100, 10);
        cache.set("k1", vec![0u8; 5], Some(5));
        cache.set("k2", vec![0u8; 5], Some(5));
        assert_eq!(cache.len(), 2);
        cache.set("k3", vec![0u8; 5], Some(5));
        assert!(cache.len() <= 2);
    }

    #[test]
    fn set_updates_existing_key() {
        let cache = L1Cache::new(10, 1_000_000);
        cache.set("k1", b"a".to_vec(), None);
        cache.set("k1", b"bb".to_vec(), None);
        assert_eq!(cache.get("k1"), Some(b"bb".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = L1Cache::new(10, 1_000_000);
        cache.set("k1", b"a".to_vec(), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
