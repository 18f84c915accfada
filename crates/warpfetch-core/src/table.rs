//! Separate-chaining hash table.
//!
//! Bucket count is always a power of two so the bucket index is a mask of
//! the hash. The table starts at [`INITIAL_BUCKETS`] and doubles, rehashing
//! every entry, once the load factor would exceed 0.75.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

/// Bucket count of a fresh table.
pub const INITIAL_BUCKETS: usize = 16;

/// Keyed storage with O(1) average lookup, insert, and remove.
#[derive(Debug, Clone)]
pub struct KeyedTable<K, V, S = RandomState> {
    buckets: Vec<Vec<(K, V)>>,
    len: usize,
    hasher: S,
}

impl<K: Hash + Eq, V> KeyedTable<K, V, RandomState> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K: Hash + Eq, V> Default for KeyedTable<K, V, RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> KeyedTable<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            buckets: empty_buckets(INITIAL_BUCKETS),
            len: 0,
            hasher,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & (self.buckets.len() - 1)
    }

    /// Insert or update. Returns the previous value when the key existed.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key);
        if let Some(slot) = self.buckets[idx].iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }

        if (self.len + 1) * 4 > self.buckets.len() * 3 {
            self.grow();
        }
        let idx = self.bucket_index(&key);
        self.buckets[idx].push((key, value));
        self.len += 1;
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.bucket_index(key);
        self.buckets[idx]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.bucket_index(key);
        self.buckets[idx]
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.bucket_index(key);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k == key)?;
        self.len -= 1;
        Some(bucket.swap_remove(pos).1)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        let mut removed = 0;
        for bucket in &mut self.buckets {
            let before = bucket.len();
            bucket.retain_mut(|(k, v)| keep(k, v));
            removed += before - bucket.len();
        }
        self.len -= removed;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|(k, v)| (k, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.buckets
            .iter_mut()
            .flat_map(|bucket| bucket.iter_mut().map(|(k, v)| (&*k, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    fn grow(&mut self) {
        let new_count = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, empty_buckets(new_count));
        for (key, value) in old.into_iter().flatten() {
            let idx = self.bucket_index(&key);
            self.buckets[idx].push((key, value));
        }
        tracing::trace!(buckets = new_count, len = self.len, "keyed table grew");
    }
}

fn empty_buckets<K, V>(count: usize) -> Vec<Vec<(K, V)>> {
    (0..count).map(|_| Vec::new()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hashes every key to zero, forcing all entries into one chain.
    #[derive(Default)]
    struct CollidingHasher;

    impl Hasher for CollidingHasher {
        fn finish(&self) -> u64 {
            0
        }
        fn write(&mut self, _bytes: &[u8]) {}
    }

    #[test]
    fn starts_with_sixteen_buckets() {
        let table: KeyedTable<u32, u32> = KeyedTable::new();
        assert_eq!(table.bucket_count(), 16);
        assert!(table.is_empty());
    }

    #[test]
    fn insert_get_remove() {
        let mut table = KeyedTable::new();
        assert_eq!(table.insert("a".to_string(), 1), None);
        assert_eq!(table.insert("b".to_string(), 2), None);
        assert_eq!(table.get(&"a".to_string()), Some(&1));
        assert_eq!(table.remove(&"a".to_string()), Some(1));
        assert_eq!(table.get(&"a".to_string()), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_existing_key_updates_in_place() {
        let mut table = KeyedTable::new();
        table.insert(7, "old");
        assert_eq!(table.insert(7, "new"), Some("old"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&7), Some(&"new"));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = KeyedTable::new();
        for i in 0..12 {
            table.insert(i, i);
        }
        assert_eq!(table.bucket_count(), 16);

        table.insert(12, 12);
        assert_eq!(table.bucket_count(), 32);
        for i in 0..13 {
            assert_eq!(table.get(&i), Some(&i), "key {i} lost during rehash");
        }
    }

    #[test]
    fn many_entries_survive_repeated_resizes() {
        let mut table = KeyedTable::new();
        for i in 0..1000u32 {
            table.insert(i, i * 2);
        }
        assert_eq!(table.len(), 1000);
        assert!(table.bucket_count().is_power_of_two());
        assert!(table.len() * 4 <= table.bucket_count() * 3);
        assert!((0..1000u32).all(|i| table.get(&i) == Some(&(i * 2))));
    }

    #[test]
    fn colliding_keys_share_a_chain() {
        let mut table: KeyedTable<u32, &str, BuildHasherDefault<CollidingHasher>> =
            KeyedTable::with_hasher(BuildHasherDefault::default());
        table.insert(1, "one");
        table.insert(2, "two");
        table.insert(1, "uno");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&1), Some(&"uno"));
        assert_eq!(table.remove(&2), Some("two"));
        assert_eq!(table.get(&1), Some(&"uno"));
    }

    #[test]
    fn retain_and_iter_mut() {
        let mut table = KeyedTable::new();
        for i in 0..10 {
            table.insert(i, i);
        }
        for (_, v) in table.iter_mut() {
            *v += 100;
        }
        table.retain(|k, _| k % 2 == 0);
        assert_eq!(table.len(), 5);
        assert_eq!(table.get(&4), Some(&104));
        assert!(!table.contains_key(&3));

        let mut keys: Vec<_> = table.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, vec![0, 2, 4, 6, 8]);
    }
}
