/*
 * This file is part of corebase.
 *
 * corebase is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * corebase is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with corebase. If not, see <https://www.gnu.org/licenses/>.
*/

//! Chained hash map: buckets are [`List`]s of `(K, V)` pairs, resized across
//! a fixed prime table exactly like the source's `s_primes`, so the number
//! of buckets is always prime and the load factor is bounded.

use super::list::{List, NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bucket counts the map grows through, verbatim from the source's static
/// prime table.
const PRIMES: &[usize] = &[
    53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241, 786433,
    1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611, 402653189,
    805306457, 1610612741,
];

const LOAD_FACTOR: f64 = 1.0;

pub struct HashMap<K, V> {
    buckets: Vec<List<(K, V)>>,
    prime_idx: usize,
    len: usize,
}

impl<K: Hash + Eq, V> HashMap<K, V> {
    pub fn new() -> Self {
        Self {
            buckets: (0..PRIMES[0]).map(|_| List::new()).collect(),
            prime_idx: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn hash(key: &K) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    fn bucket_idx(&self, key: &K) -> usize {
        (Self::hash(key) % self.buckets.len() as u64) as usize
    }

    fn locate(&self, key: &K) -> Option<(usize, NodeId)> {
        let b = self.bucket_idx(key);
        self.buckets[b]
            .iter()
            .find(|(_, (k, _))| k == key)
            .map(|(id, _)| (b, id))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let (b, id) = self.locate(key)?;
        Some(&self.buckets[b].get(id).1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let (b, id) = self.locate(key)?;
        Some(&mut self.buckets[b].get_mut(id).1)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.locate(key).is_some()
    }

    /// Inserts `(key, value)`, returning the previous value if `key` was
    /// already present, mirroring `x_hmap_replace_or_insert`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some((b, id)) = self.locate(&key) {
            let slot = self.buckets[b].get_mut(id);
            return Some(std::mem::replace(&mut slot.1, value));
        }
        if (self.len + 1) as f64 > self.buckets.len() as f64 * LOAD_FACTOR {
            self.expand();
        }
        let b = self.bucket_idx(&key);
        self.buckets[b].push_back((key, value));
        self.len += 1;
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (b, id) = self.locate(key)?;
        let (_, v) = self.buckets[b].remove(id);
        self.len -= 1;
        Some(v)
    }

    fn expand(&mut self) {
        if self.prime_idx + 1 >= PRIMES.len() {
            return;
        }
        self.prime_idx += 1;
        let new_size = PRIMES[self.prime_idx];
        let mut new_buckets: Vec<List<(K, V)>> = (0..new_size).map(|_| List::new()).collect();
        for mut bucket in std::mem::take(&mut self.buckets) {
            for (k, v) in bucket.drain() {
                let idx = (Self::hash(&k) % new_size as u64) as usize;
                new_buckets[idx].push_back((k, v));
            }
        }
        self.buckets = new_buckets;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|(_, (k, v))| (k, v)))
    }
}

impl<K: Hash + Eq, V> Default for HashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let mut m = HashMap::new();
        assert_eq!(m.insert("a", 1), None);
        assert_eq!(m.insert("b", 2), None);
        assert_eq!(m.get(&"a"), Some(&1));
        assert_eq!(m.get(&"b"), Some(&2));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn insert_replaces_existing() {
        let mut m = HashMap::new();
        m.insert("a", 1);
        assert_eq!(m.insert("a", 2), Some(1));
        assert_eq!(m.get(&"a"), Some(&2));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn remove_drops_entry() {
        let mut m = HashMap::new();
        m.insert("a", 1);
        assert_eq!(m.remove(&"a"), Some(1));
        assert_eq!(m.get(&"a"), None);
        assert!(m.is_empty());
    }

    #[test]
    fn expands_across_prime_buckets_without_losing_entries() {
        let mut m = HashMap::new();
        for i in 0..500 {
            m.insert(i, i * 2);
        }
        assert_eq!(m.len(), 500);
        for i in 0..500 {
            assert_eq!(m.get(&i), Some(&(i * 2)));
        }
        assert!(m.buckets.len() > PRIMES[0]);
    }
}
