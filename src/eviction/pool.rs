//! Eviction candidate pool.
//!
//! A fixed number of slots sorted by idle time, ascending. The most evictable
//! candidate sits at the highest filled index. Each populate round samples a
//! handful of store entries and merges them in, so over several rounds the
//! pool converges on keys that have been idle longest across the whole
//! store, without ever ordering the store itself.
//!
//! ```text
//!   idx:   0     1     2     3     4
//!        [ 12 ][ 80 ][ 310][ -- ][ -- ]     idle ms, ascending
//!                        ▲
//!                        └── evicted next
//! ```

use crate::dict::Dict;
use crate::object::Object;

/// A key considered for eviction, with its idle time when sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub idle: i64,
}

/// Sorted pool of eviction candidates.
#[derive(Debug)]
pub struct EvictionPool {
    slots: Vec<Option<Candidate>>,
}

impl EvictionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn contains(&self, key: &str) -> bool {
        self.slots.iter().flatten().any(|c| c.key == key)
    }

    /// Samples `samples` entries from `store` and merges them into the pool
    /// by idle time as of `now`. Returns how many were inserted.
    pub fn populate(&mut self, store: &mut Dict<Object>, samples: usize, now: i64) -> usize {
        let sampled: Vec<(String, i64)> = store
            .sample_entries(samples)
            .into_iter()
            .map(|e| (e.key().to_owned(), e.value().idle_ms(now)))
            .collect();

        sampled
            .into_iter()
            .filter(|(key, idle)| self.insert(key, *idle))
            .count()
    }

    /// Merges one candidate, keeping the slots sorted.
    ///
    /// Lands on the first slot that is empty or holds an idle time not
    /// smaller than `idle`. When the pool is full the candidate either
    /// pushes out the least idle entry at slot 0 or, if it is the least
    /// idle of all, is dropped. A key already in the pool is ignored.
    pub fn insert(&mut self, key: &str, idle: i64) -> bool {
        let cap = self.slots.len();
        if cap == 0 || self.contains(key) {
            return false;
        }

        let mut k = 0;
        while k < cap {
            match &self.slots[k] {
                Some(c) if c.idle < idle => k += 1,
                _ => break,
            }
        }

        let tail_free = self.slots[cap - 1].is_none();
        if k == 0 && !tail_free {
            return false;
        }
        if k < cap && self.slots[k].is_some() {
            if tail_free {
                // slide k.. one slot right into the free tail
                self.slots[k..].rotate_right(1);
            } else {
                // slide ..=k one slot left, dropping slot 0
                k -= 1;
                self.slots[..=k].rotate_left(1);
            }
        } else if k == cap {
            k -= 1;
            self.slots.rotate_left(1);
        }

        self.slots[k] = Some(Candidate {
            key: key.to_owned(),
            idle,
        });
        true
    }

    /// Removes and returns the most idle candidate.
    pub fn pop_best(&mut self) -> Option<Candidate> {
        self.slots.iter_mut().rev().find_map(Option::take)
    }

    /// Idle times of the filled slots in slot order.
    pub fn idle_times(&self) -> Vec<i64> {
        self.slots.iter().flatten().map(|c| c.idle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(idles: &[i64], capacity: usize) -> EvictionPool {
        let mut pool = EvictionPool::new(capacity);
        for idle in idles {
            assert!(pool.insert(&format!("k{}", idle), *idle));
        }
        pool
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let pool = filled(&[5, 1, 3], 4);
        assert_eq!(pool.idle_times(), vec![1, 3, 5]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_full_pool_drops_least_idle() {
        let mut pool = filled(&[5, 1, 3], 3);

        assert!(pool.insert("k4", 4));
        assert_eq!(pool.idle_times(), vec![3, 4, 5]);

        // less idle than everything held
        assert!(!pool.insert("k0", 0));
        assert_eq!(pool.idle_times(), vec![3, 4, 5]);

        // more idle than everything held
        assert!(pool.insert("k10", 10));
        assert_eq!(pool.idle_times(), vec![4, 5, 10]);
    }

    #[test]
    fn test_duplicate_key_ignored() {
        let mut pool = filled(&[7], 3);
        assert!(!pool.insert("k7", 100));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_pop_best_order() {
        let mut pool = filled(&[2, 9, 4], 5);
        let popped: Vec<i64> = std::iter::from_fn(|| pool.pop_best())
            .map(|c| c.idle)
            .collect();
        assert_eq!(popped, vec![9, 4, 2]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_populate_from_store() {
        let mut store = Dict::new();
        for i in 0..10 {
            store.add(format!("key:{}", i), Object::string("v"));
        }

        let mut pool = EvictionPool::new(15);
        let inserted = pool.populate(&mut store, 5, crate::time::now_ms() + 1000);
        assert!(inserted > 0 && inserted <= 5);
        assert_eq!(pool.len(), inserted);

        // the same keys sampled again are not duplicated
        for _ in 0..20 {
            pool.populate(&mut store, 5, crate::time::now_ms() + 1000);
        }
        assert!(pool.len() <= 10);
    }

    #[test]
    fn test_zero_capacity() {
        let mut pool = EvictionPool::new(0);
        assert!(!pool.insert("k", 1));
        assert!(pool.pop_best().is_none());
    }
}
