//! core::cache
//!
//! Bounded, process-scoped cache injected into the engine.
//!
//! # Eviction
//!
//! Entries are evicted first-in first-out once `capacity` is reached.
//! Re-inserting an existing key replaces the value without refreshing its
//! position. A capacity of zero disables caching.
//!
//! # Example
//!
//! ```
//! use submit_engine::core::cache::BoundedCache;
//!
//! let cache = BoundedCache::new(2);
//! cache.put("a", 1);
//! cache.put("b", 2);
//! cache.put("c", 3);
//! assert_eq!(cache.get(&"a"), None);
//! assert_eq!(cache.get(&"c"), Some(3));
//! ```

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

/// A thread-safe FIFO cache with a fixed capacity.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().ok()?;
        inner.entries.get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.entries.insert(key.clone(), value).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
    }

    /// Return the cached value or compute, store and return it.
    pub fn get_or_try_insert<E>(
        &self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let value = compute()?;
        self.put(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
