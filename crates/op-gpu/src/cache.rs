//! Keyed ownership of device resources
//!
//! A cache owns its entries until they are removed, evicted or drained; the
//! caller releases whatever comes back out against the device. After a device
//! loss the entries are forgotten instead, since their handles are already
//! dead.

use std::collections::HashMap;
use std::hash::Hash;

/// Map from a derived key to an owned resource entry
pub struct ResourceCache<K, V> {
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Copy, V> ResourceCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an entry, handing back any entry it displaced
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    /// Remove every entry matching `predicate` and return them for release
    pub fn evict_if<F>(&mut self, mut predicate: F) -> Vec<V>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect()
    }

    /// Remove every entry and return them for release
    pub fn drain(&mut self) -> Vec<V> {
        self.entries.drain().map(|(_, v)| v).collect()
    }

    /// Drop every entry without handing it back. Returns how many were dropped.
    pub fn forget_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

impl<K: Eq + Hash + Copy, V> Default for ResourceCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
