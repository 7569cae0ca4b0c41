//! A single power-of-two bucket array with chained entries.
//!
//! Each bucket owns the head of its chain. Entries are boxed so that moving
//! a whole entry between tables during rehashing is a pointer move.

use std::iter;

/// A key/value pair stored in a [`Dict`](super::Dict).
#[derive(Debug)]
pub struct Entry<V> {
    pub(super) key: String,
    pub(super) value: V,
    /// Cached hash of `key`, so migration never hashes twice.
    pub(super) hash: u64,
    pub(super) next: Option<Box<Entry<V>>>,
}

impl<V> Entry<V> {
    pub(super) fn new(key: String, value: V, hash: u64) -> Box<Self> {
        Box::new(Self {
            key,
            value,
            hash,
            next: None,
        })
    }

    /// The entry's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entry's value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Iterates this entry and every entry chained after it.
    pub(super) fn chain(&self) -> impl Iterator<Item = &Entry<V>> {
        iter::successors(Some(self), |e| e.next.as_deref())
    }
}

/// Bucket array of one of the two tables of a dict.
#[derive(Debug)]
pub(super) struct HashTable<V> {
    buckets: Box<[Option<Box<Entry<V>>>]>,
    pub(super) used: usize,
}

impl<V> HashTable<V> {
    /// Allocates `size` empty buckets. `size` must be a power of two.
    pub(super) fn with_size(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        Self {
            buckets: iter::repeat_with(|| None).take(size).collect(),
            used: 0,
        }
    }

    #[inline]
    pub(super) fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(super) fn sizemask(&self) -> usize {
        self.buckets.len() - 1
    }

    #[inline]
    fn index(&self, hash: u64) -> usize {
        (hash as usize) & self.sizemask()
    }

    /// Head of the chain stored in bucket `idx`.
    #[inline]
    pub(super) fn bucket(&self, idx: usize) -> Option<&Entry<V>> {
        self.buckets[idx].as_deref()
    }

    #[inline]
    pub(super) fn bucket_is_empty(&self, idx: usize) -> bool {
        self.buckets[idx].is_none()
    }

    /// Detaches the whole chain of bucket `idx`. `used` is left untouched;
    /// the caller accounts for each entry it moves.
    pub(super) fn take_bucket(&mut self, idx: usize) -> Option<Box<Entry<V>>> {
        self.buckets[idx].take()
    }

    pub(super) fn find(&self, hash: u64, key: &str) -> Option<&Entry<V>> {
        self.bucket(self.index(hash))?
            .chain()
            .find(|e| e.hash == hash && e.key == key)
    }

    pub(super) fn find_mut(&mut self, hash: u64, key: &str) -> Option<&mut Entry<V>> {
        let idx = self.index(hash);
        let mut cur = self.buckets[idx].as_deref_mut();
        while let Some(entry) = cur {
            if entry.hash == hash && entry.key == key {
                return Some(entry);
            }
            cur = entry.next.as_deref_mut();
        }
        None
    }

    /// Links `entry` at the head of its bucket.
    pub(super) fn insert(&mut self, mut entry: Box<Entry<V>>) {
        let idx = self.index(entry.hash);
        entry.next = self.buckets[idx].take();
        self.buckets[idx] = Some(entry);
        self.used += 1;
    }

    /// Unlinks the entry for `key`, if present.
    pub(super) fn remove(&mut self, hash: u64, key: &str) -> Option<Box<Entry<V>>> {
        let idx = self.index(hash);
        let mut link = &mut self.buckets[idx];
        while link
            .as_ref()
            .map_or(false, |e| e.hash != hash || e.key != key)
        {
            if let Some(entry) = link {
                link = &mut entry.next;
            }
        }
        let mut removed = link.take()?;
        *link = removed.next.take();
        self.used -= 1;
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove_in_one_chain() {
        // a single bucket forces every entry into the same chain
        let mut table = HashTable::with_size(1);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            table.insert(Entry::new(key.to_string(), i, i as u64));
        }
        assert_eq!(table.used, 3);
        assert_eq!(table.find(1, "b").map(|e| e.value), Some(1));

        let removed = table.remove(1, "b").map(|e| e.value);
        assert_eq!(removed, Some(1));
        assert_eq!(table.used, 2);
        assert!(table.find(1, "b").is_none());
        assert!(table.find(0, "a").is_some());
        assert!(table.find(2, "c").is_some());
        assert!(table.remove(1, "b").is_none());
    }

    #[test]
    fn test_hash_mismatch_is_not_a_hit() {
        let mut table = HashTable::with_size(4);
        table.insert(Entry::new("k".to_string(), (), 7));
        assert!(table.find(3, "k").is_none());
        assert!(table.find(7, "k").is_some());
    }
}
