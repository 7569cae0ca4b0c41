//! Incrementally Rehashing Hash Table
//!
//! `Dict` is the table underneath the keyspace. It keeps two bucket arrays:
//! the primary table and, while a resize is in flight, the table being
//! grown into. Instead of moving every entry at once when the load factor
//! reaches 1.0, the migration is spread out:
//!
//! 1. Every lookup, insert or delete first migrates one bucket.
//! 2. A maintenance cron migrates batches of buckets for a fixed time budget.
//!
//! ```text
//!                 rehash_index
//!                      │
//!   table 0  [ ][ ][ ][a][ ][b→c][ ][d]      (buckets below the index are empty)
//!                      │ move chain
//!                      ▼
//!   table 1  [ ][a][ ][ ][ ][ ][ ][ ][ ][ ][ ][ ][ ][ ][ ][ ]
//! ```
//!
//! While rehashing, lookups consult both tables and new keys always land in
//! the second one, so the first can only drain. When it is empty the second
//! table becomes the primary and a fresh minimum-size table takes its place.
//!
//! ## Sampling
//!
//! [`Dict::random_entry`] and [`Dict::sample_entries`] return entries picked
//! from random bucket positions. Sampling is cheap but clustered by bucket
//! locality; eviction and active expiration accept that bias.

mod table;

use rand::Rng;
use std::collections::hash_map::RandomState;
use std::collections::HashSet;
use std::fmt;
use std::hash::BuildHasher;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use table::Entry;
use table::HashTable;

/// Default minimum number of buckets per table.
pub const DICT_HT_INITIAL_SIZE: usize = 4;

/// Buckets migrated per batch by [`Dict::rehash_for`].
const REHASH_BATCH: usize = 100;

/// Fill percentage under which a table is worth shrinking.
const MIN_FILL_PERCENT: usize = 10;

/// Reasons a resize request can be refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DictError {
    /// A rehash is already running; only one may be in flight.
    #[error("rehash already in progress")]
    RehashInProgress,

    /// The requested size cannot hold the entries already stored.
    #[error("requested size {requested} is smaller than {used} stored entries")]
    SizeTooSmall { requested: usize, used: usize },

    /// The table already has the requested size.
    #[error("table already has {0} buckets")]
    SameSize(usize),
}

/// Size and fill of one of the two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    /// Number of buckets.
    pub size: usize,
    /// Number of entries stored.
    pub used: usize,
}

/// A chained hash table keyed by strings with incremental rehashing.
pub struct Dict<V> {
    tables: [HashTable<V>; 2],
    /// Next bucket of table 0 to migrate; `None` when not rehashing.
    rehash_index: Option<usize>,
    min_size: usize,
    hasher: RandomState,
}

impl<V> fmt::Debug for Dict<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dict")
            .field("len", &self.len())
            .field("primary", &self.primary())
            .field("secondary", &self.secondary())
            .field("rehash_index", &self.rehash_index)
            .finish()
    }
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    /// Creates an empty dict with the default minimum table size.
    pub fn new() -> Self {
        Self::with_min_size(DICT_HT_INITIAL_SIZE)
    }

    /// Creates an empty dict whose tables never shrink below `min_size`
    /// buckets (rounded up to a power of two).
    pub fn with_min_size(min_size: usize) -> Self {
        let min_size = next_power(min_size.max(1));
        Self {
            tables: [HashTable::with_size(min_size), HashTable::with_size(min_size)],
            rehash_index: None,
            min_size,
            hasher: RandomState::new(),
        }
    }

    /// Number of entries across both tables.
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of buckets currently allocated for lookups.
    pub fn slots(&self) -> usize {
        if self.is_rehashing() {
            self.tables[0].size() + self.tables[1].size()
        } else {
            self.tables[0].size()
        }
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_index.is_some()
    }

    /// The primary table.
    pub fn primary(&self) -> TableInfo {
        self.table_info(0)
    }

    /// The table being migrated into (minimum size and empty when idle).
    pub fn secondary(&self) -> TableInfo {
        self.table_info(1)
    }

    fn table_info(&self, i: usize) -> TableInfo {
        TableInfo {
            size: self.tables[i].size(),
            used: self.tables[i].used,
        }
    }

    #[inline]
    fn hash_key(&self, key: &str) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Inserts `key`. An existing entry has its value replaced in place and
    /// the previous value is returned.
    pub fn add(&mut self, key: String, value: V) -> Option<V> {
        self.rehash_if_active();

        let hash = self.hash_key(&key);
        if let Some(entry) = self.find_mut(hash, &key) {
            return Some(std::mem::replace(&mut entry.value, value));
        }

        self.expand_if_needed();
        let target = if self.is_rehashing() { 1 } else { 0 };
        self.tables[target].insert(Entry::new(key, value, hash));
        None
    }

    /// Looks up `key`.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        if self.is_empty() {
            return None;
        }
        self.rehash_if_active();
        let hash = self.hash_key(key);
        self.find(hash, key).map(|e| &e.value)
    }

    /// Looks up `key` for modification.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        if self.is_empty() {
            return None;
        }
        self.rehash_if_active();
        let hash = self.hash_key(key);
        self.find_mut(hash, key).map(|e| &mut e.value)
    }

    pub fn contains_key(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key` and returns its value.
    pub fn delete(&mut self, key: &str) -> Option<V> {
        if self.is_empty() {
            return None;
        }
        self.rehash_if_active();

        let hash = self.hash_key(key);
        let tables = if self.is_rehashing() { 2 } else { 1 };
        for table in &mut self.tables[..tables] {
            if let Some(entry) = table.remove(hash, key) {
                return Some(entry.value);
            }
        }
        None
    }

    /// Drops every entry and shrinks both tables to the minimum size.
    pub fn clear(&mut self) {
        self.tables = [
            HashTable::with_size(self.min_size),
            HashTable::with_size(self.min_size),
        ];
        self.rehash_index = None;
    }

    fn find(&self, hash: u64, key: &str) -> Option<&Entry<V>> {
        let found = self.tables[0].find(hash, key);
        if found.is_some() || !self.is_rehashing() {
            return found;
        }
        self.tables[1].find(hash, key)
    }

    fn find_mut(&mut self, hash: u64, key: &str) -> Option<&mut Entry<V>> {
        let rehashing = self.is_rehashing();
        let [primary, secondary] = &mut self.tables;
        if let Some(entry) = primary.find_mut(hash, key) {
            return Some(entry);
        }
        if rehashing {
            secondary.find_mut(hash, key)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Resizing
    // ------------------------------------------------------------------

    /// Starts a rehash into a table of at least `size` buckets.
    ///
    /// Refused while another rehash is running or when `size` cannot hold
    /// the entries of the primary table.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        if self.is_rehashing() {
            return Err(DictError::RehashInProgress);
        }
        let used = self.tables[0].used;
        if used > size {
            return Err(DictError::SizeTooSmall {
                requested: size,
                used,
            });
        }
        let real_size = next_power(size.max(self.min_size));
        if real_size == self.tables[0].size() {
            return Err(DictError::SameSize(real_size));
        }

        self.tables[1] = HashTable::with_size(real_size);
        self.rehash_index = Some(0);
        Ok(())
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        let primary = &self.tables[0];
        if primary.used >= primary.size() {
            let _ = self.expand(primary.used.saturating_mul(2));
        }
    }

    /// Whether the primary table is sparse enough to be worth shrinking.
    pub fn needs_resize(&self) -> bool {
        let primary = &self.tables[0];
        !self.is_rehashing()
            && primary.size() > self.min_size
            && primary.used * 100 / primary.size() < MIN_FILL_PERCENT
    }

    /// Starts shrinking a sparse primary table to the smallest power of two
    /// that holds its entries. Returns whether a rehash was started.
    pub fn resize_to_fit(&mut self) -> bool {
        self.needs_resize() && self.expand(self.tables[0].used).is_ok()
    }

    // ------------------------------------------------------------------
    // Rehashing
    // ------------------------------------------------------------------

    #[inline]
    fn rehash_if_active(&mut self) {
        if self.is_rehashing() {
            self.rehash_step(1);
        }
    }

    /// Migrates up to `n` non-empty buckets from the primary table.
    ///
    /// At most `n * 10` empty buckets are skipped per call so that a sparse
    /// region cannot turn one step into a long scan. Returns `true` while
    /// there is still work left.
    pub fn rehash_step(&mut self, n: usize) -> bool {
        let Some(mut idx) = self.rehash_index else {
            return false;
        };
        let mut empty_visits = n * 10;
        let [from, to] = &mut self.tables;

        for _ in 0..n {
            if from.used == 0 {
                break;
            }
            // from.used > 0 guarantees a non-empty bucket at or after idx
            while from.bucket_is_empty(idx) {
                idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    self.rehash_index = Some(idx);
                    return true;
                }
            }

            let mut chain = from.take_bucket(idx);
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                from.used -= 1;
                to.insert(entry);
            }
            idx += 1;
        }

        if from.used == 0 {
            *from = std::mem::replace(to, HashTable::with_size(self.min_size));
            self.rehash_index = None;
            return false;
        }

        self.rehash_index = Some(idx);
        true
    }

    /// Rehashes in batches of 100 buckets until `budget` elapses or the
    /// rehash completes. Returns the number of batches run.
    pub fn rehash_for(&mut self, budget: Duration) -> usize {
        let start = Instant::now();
        let mut batches = 0;
        while self.is_rehashing() {
            batches += 1;
            if !self.rehash_step(REHASH_BATCH) || start.elapsed() >= budget {
                break;
            }
        }
        batches
    }

    // ------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------

    /// Returns an entry picked at random, or `None` when empty.
    pub fn random_entry(&mut self) -> Option<&Entry<V>> {
        if self.is_empty() {
            return None;
        }
        self.rehash_if_active();

        let mut rng = rand::thread_rng();
        let head = match self.rehash_index {
            Some(start) => {
                // buckets of table 0 below `start` are already empty
                let size0 = self.tables[0].size();
                let span = size0 + self.tables[1].size() - start;
                loop {
                    let h = start + rng.gen_range(0..span);
                    let bucket = if h >= size0 {
                        self.tables[1].bucket(h - size0)
                    } else {
                        self.tables[0].bucket(h)
                    };
                    if let Some(entry) = bucket {
                        break entry;
                    }
                }
            }
            None => {
                let mask = self.tables[0].sizemask();
                loop {
                    if let Some(entry) = self.tables[0].bucket(rng.gen::<usize>() & mask) {
                        break entry;
                    }
                }
            }
        };

        // pick uniformly inside the chain
        let len = head.chain().count();
        head.chain().nth(rng.gen_range(0..len))
    }

    /// Collects up to `count` entries starting at a random bucket and
    /// walking forward through both tables.
    ///
    /// Returns fewer than `count` entries only when the dict holds fewer,
    /// or when `count * 10` bucket probes did not find enough of them.
    /// Entries come out clustered by bucket position. A bucket is collected
    /// at most once, so no entry appears twice.
    pub fn sample_entries(&mut self, count: usize) -> Vec<&Entry<V>> {
        let count = count.min(self.len());
        if count == 0 {
            return Vec::new();
        }
        self.rehash_if_active();

        let rehash_index = self.rehash_index;
        let tables = if rehash_index.is_some() { 2 } else { 1 };
        let mut max_mask = self.tables[0].sizemask();
        if tables == 2 {
            max_mask = max_mask.max(self.tables[1].sizemask());
        }

        let mut rng = rand::thread_rng();
        let mut idx = rng.gen::<usize>() & max_mask;
        let mut max_steps = count * 10;
        let mut empty_run = 0;
        let mut sampled = Vec::with_capacity(count);
        let mut visited: HashSet<(usize, usize)> = HashSet::new();

        while sampled.len() < count && max_steps > 0 {
            max_steps -= 1;
            for t in 0..tables {
                if let Some(start) = rehash_index {
                    // table 0 is empty below the rehash index; when table 1
                    // is also out of range here, jump straight to the index
                    if t == 0 && idx < start {
                        if idx >= self.tables[1].size() {
                            idx = start;
                        } else {
                            continue;
                        }
                    }
                }
                let table = &self.tables[t];
                if idx >= table.size() {
                    continue;
                }
                match table.bucket(idx) {
                    None => {
                        empty_run += 1;
                        if empty_run >= 5 && empty_run > count {
                            idx = rng.gen::<usize>() & max_mask;
                            empty_run = 0;
                        }
                    }
                    Some(head) => {
                        empty_run = 0;
                        if !visited.insert((t, idx)) {
                            continue;
                        }
                        for entry in head.chain() {
                            sampled.push(entry);
                            if sampled.len() == count {
                                return sampled;
                            }
                        }
                    }
                }
            }
            idx = (idx + 1) & max_mask;
        }
        sampled
    }
}

/// Smallest power of two `>= size`, saturating at the largest one.
fn next_power(size: usize) -> usize {
    size.checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn finish_rehash<V>(dict: &mut Dict<V>) {
        while dict.rehash_step(100) {}
    }

    #[test]
    fn test_empty_dict() {
        let mut dict: Dict<i32> = Dict::new();

        assert_eq!(dict.len(), 0);
        assert!(!dict.is_rehashing());
        assert_eq!(
            dict.primary(),
            TableInfo {
                size: DICT_HT_INITIAL_SIZE,
                used: 0
            }
        );
        assert_eq!(dict.get("missing"), None);
        assert_eq!(dict.delete("missing"), None);
        assert!(dict.random_entry().is_none());
        assert!(dict.sample_entries(5).is_empty());
    }

    #[test]
    fn test_add_get_overwrite() {
        let mut dict = Dict::new();

        assert_eq!(dict.add("a".to_string(), 1), None);
        assert_eq!(dict.add("b".to_string(), 2), None);
        assert_eq!(dict.add("".to_string(), 3), None);
        assert_eq!(dict.get("a"), Some(&1));
        assert_eq!(dict.get(""), Some(&3));

        // same key twice replaces the value, no second entry
        assert_eq!(dict.add("a".to_string(), 10), Some(1));
        assert_eq!(dict.get("a"), Some(&10));
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut dict = Dict::new();
        dict.add("key".to_string(), "value");

        assert_eq!(dict.delete("key"), Some("value"));
        assert_eq!(dict.delete("key"), None);
        assert_eq!(dict.len(), 0);
        assert_eq!(dict.get("key"), None);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut dict = Dict::new();
        dict.add("counter".to_string(), 1);
        if let Some(v) = dict.get_mut("counter") {
            *v += 41;
        }
        assert_eq!(dict.get("counter"), Some(&42));
    }

    #[test]
    fn test_len_tracks_random_operations() {
        let mut dict = Dict::new();
        let mut model = HashMap::new();
        let mut rng = rand::thread_rng();

        for _ in 0..20_000 {
            let key = format!("k{}", rng.gen_range(0..2_000));
            if rng.gen_bool(0.6) {
                let value = rng.gen::<u32>();
                assert_eq!(dict.add(key.clone(), value), model.insert(key, value));
            } else {
                assert_eq!(dict.delete(&key), model.remove(&key));
            }
            assert_eq!(dict.len(), model.len());
        }

        for (key, value) in &model {
            assert_eq!(dict.get(key), Some(value));
        }
    }

    #[test]
    fn test_crossing_load_factor_starts_rehash() {
        let mut dict = Dict::new();
        for i in 0..4 {
            dict.add(i.to_string(), i);
        }
        assert!(!dict.is_rehashing());

        dict.add("4".to_string(), 4);
        assert!(dict.is_rehashing());
        assert_eq!(dict.secondary().size, 8);
        assert_eq!(dict.len(), 5);
    }

    #[test]
    fn test_rehash_preserves_every_key() {
        let mut dict = Dict::new();
        let mut n = 0;
        // fill until a large table starts rehashing
        while !(dict.is_rehashing() && dict.primary().size >= 1024) {
            dict.add(format!("key:{}", n), n);
            n += 1;
        }

        // interleave single steps with full verification
        while dict.is_rehashing() {
            dict.rehash_step(1);
            let info = (dict.primary(), dict.secondary());
            assert_eq!(info.0.used + info.1.used, n);
            assert_eq!(dict.len(), n);
        }

        for i in 0..n {
            assert_eq!(dict.get(&format!("key:{}", i)), Some(&i));
        }
        assert_eq!(dict.primary().used, n);
        assert_eq!(dict.secondary().used, 0);
    }

    #[test]
    fn test_reads_and_deletes_during_rehash() {
        let mut dict = Dict::new();
        for i in 0..64 {
            dict.add(i.to_string(), i);
        }
        finish_rehash(&mut dict);
        dict.add("64".to_string(), 64);
        assert!(dict.is_rehashing());

        for i in (0..65).step_by(2) {
            assert_eq!(dict.delete(&i.to_string()), Some(i));
        }
        for i in 0..65 {
            let expected = if i % 2 == 0 { None } else { Some(&i) };
            assert_eq!(dict.get(&i.to_string()), expected);
        }
        assert_eq!(dict.len(), 32);
    }

    #[test]
    fn test_expand_refused() {
        let mut dict = Dict::new();
        for i in 0..10 {
            dict.add(i.to_string(), i);
        }
        finish_rehash(&mut dict);

        assert_eq!(
            dict.expand(5),
            Err(DictError::SizeTooSmall {
                requested: 5,
                used: 10
            })
        );
        assert_eq!(dict.expand(16), Err(DictError::SameSize(16)));

        assert!(dict.expand(64).is_ok());
        assert_eq!(dict.expand(128), Err(DictError::RehashInProgress));
    }

    #[test]
    fn test_rehash_for_completes() {
        let mut dict = Dict::new();
        for i in 0..10_000 {
            dict.add(i.to_string(), i);
        }
        dict.rehash_for(Duration::from_secs(5));
        assert!(!dict.is_rehashing());
        assert_eq!(dict.primary().used, 10_000);
    }

    #[test]
    fn test_resize_to_fit_shrinks_sparse_table() {
        let mut dict = Dict::new();
        for i in 0..1000 {
            dict.add(i.to_string(), i);
        }
        finish_rehash(&mut dict);
        for i in 10..1000 {
            dict.delete(&i.to_string());
        }
        finish_rehash(&mut dict);

        assert!(dict.needs_resize());
        assert!(dict.resize_to_fit());
        finish_rehash(&mut dict);

        assert_eq!(dict.primary(), TableInfo { size: 16, used: 10 });
        assert!(!dict.needs_resize());
        for i in 0..10 {
            assert_eq!(dict.get(&i.to_string()), Some(&i));
        }
    }

    #[test]
    fn test_random_entry_returns_live_key() {
        let mut dict = Dict::new();
        for i in 0..100 {
            dict.add(format!("k{}", i), i);
        }
        for _ in 0..50 {
            let entry = dict.random_entry().map(|e| (e.key().to_string(), *e.value()));
            let (key, value) = entry.expect("dict is not empty");
            assert_eq!(key, format!("k{}", value));
        }
    }

    #[test]
    fn test_sample_entries_counts() {
        let mut dict = Dict::new();
        for i in 0..1000 {
            dict.add(format!("k{}", i), i);
        }
        finish_rehash(&mut dict);
        assert_eq!(dict.sample_entries(10).len(), 10);

        let mut small = Dict::new();
        for i in 0..20 {
            small.add(format!("k{}", i), i);
        }
        finish_rehash(&mut small);
        let keys: HashSet<String> = small
            .sample_entries(50)
            .iter()
            .map(|e| e.key().to_string())
            .collect();
        assert_eq!(keys.len(), 20);
    }

    #[test]
    fn test_sample_entries_are_distinct_in_sparse_table() {
        let mut dict = Dict::new();
        dict.expand(1024).unwrap();
        finish_rehash(&mut dict);
        for i in 0..6 {
            dict.add(format!("k{}", i), i);
        }
        assert_eq!(dict.slots(), 1024);

        // random jumps over the empty region must not revisit a bucket
        for _ in 0..2000 {
            let keys: Vec<String> = dict
                .sample_entries(20)
                .iter()
                .map(|e| e.key().to_string())
                .collect();
            let distinct: HashSet<&String> = keys.iter().collect();
            assert_eq!(distinct.len(), keys.len(), "duplicate in {:?}", keys);
        }
    }

    #[test]
    fn test_sample_entries_while_rehashing() {
        let mut dict = Dict::new();
        for i in 0..512 {
            dict.add(i.to_string(), i);
        }
        finish_rehash(&mut dict);
        dict.add("512".to_string(), 512);
        assert!(dict.is_rehashing());

        let sample: Vec<(String, i32)> = dict
            .sample_entries(20)
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();
        assert_eq!(sample.len(), 20);
        for (key, value) in sample {
            assert_eq!(key, value.to_string());
        }
    }

    #[test]
    fn test_incremental_rehash_million_keys() {
        const N: usize = 1 << 20;
        let mut dict = Dict::with_min_size(4);

        for i in 0..N {
            dict.add(i.to_string(), i);
        }
        assert!(!dict.is_rehashing());

        dict.add(N.to_string(), N);
        assert!(dict.is_rehashing());

        while dict.rehash_step(100) {}

        assert!(!dict.is_rehashing());
        assert_eq!(dict.secondary(), TableInfo { size: 4, used: 0 });
        assert_eq!(dict.primary().used, N + 1);
    }
}
