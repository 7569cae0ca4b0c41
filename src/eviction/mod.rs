//! Memory-Bounded Eviction
//!
//! When tracked memory exceeds the configured budget, the [`Evictor`] deletes
//! keys until usage is back under it. Which keys depends on the policy:
//!
//! - `allkeys-lru`: the most idle candidate of an [`EvictionPool`] refilled
//!   by random sampling. This approximates global LRU order without keeping
//!   the store sorted.
//! - `allkeys-random`: a uniformly random key.
//! - `noeviction`: nothing is deleted; the write that needs memory is
//!   rejected instead.
//!
//! Freed memory is measured as the change in the database's tracked usage
//! around each deletion, so the loop stops as soon as the deficit is covered.

mod pool;

pub use pool::{Candidate, EvictionPool};

use crate::config::{Config, EvictionPolicy};
use crate::error::{KeyspaceError, KeyspaceResult};
use crate::keyspace::Database;
use crate::time::now_ms;
use tracing::{debug, warn};

/// Pool refills tried in a row without finding a live candidate before an
/// eviction attempt gives up.
const MAX_EMPTY_REFILLS: usize = 16;

/// Settings of the eviction subsystem.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Budget in bytes; 0 means unlimited.
    pub maxmemory: usize,
    pub policy: EvictionPolicy,
    /// Entries sampled per pool refill.
    pub samples: usize,
    pub pool_size: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            maxmemory: 0,
            policy: EvictionPolicy::Noeviction,
            samples: 5,
            pool_size: 15,
        }
    }
}

impl From<&Config> for EvictionConfig {
    fn from(config: &Config) -> Self {
        Self {
            maxmemory: config.maxmemory,
            policy: config.maxmemory_policy,
            samples: config.maxmemory_samples,
            pool_size: config.eviction_pool_size,
        }
    }
}

/// Enforces the memory budget on a [`Database`].
#[derive(Debug)]
pub struct Evictor {
    config: EvictionConfig,
    pool: EvictionPool,
    evicted_keys: u64,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self {
            pool: EvictionPool::new(config.pool_size),
            config,
            evicted_keys: 0,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.config.policy
    }

    pub fn maxmemory(&self) -> usize {
        self.config.maxmemory
    }

    /// Total keys evicted so far.
    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys
    }

    /// Bytes above the budget, 0 when within it or unlimited.
    pub fn excess(&self, db: &Database) -> usize {
        if self.config.maxmemory == 0 {
            return 0;
        }
        db.used_memory().saturating_sub(self.config.maxmemory)
    }

    /// Evicts keys until memory is within budget. Returns how many keys
    /// were evicted.
    ///
    /// Fails with [`KeyspaceError::OutOfMemory`] when usage is over budget
    /// and the policy forbids eviction, or when no candidate could be found
    /// before the deficit was covered.
    pub fn free_memory_if_needed(&mut self, db: &mut Database) -> KeyspaceResult<usize> {
        self.free_memory_with(db, |_| {})
    }

    /// Like [`Evictor::free_memory_if_needed`], calling `on_evict` with
    /// each key after it is deleted.
    pub fn free_memory_with(
        &mut self,
        db: &mut Database,
        mut on_evict: impl FnMut(&str),
    ) -> KeyspaceResult<usize> {
        let to_free = self.excess(db);
        if to_free == 0 {
            return Ok(0);
        }
        if self.config.policy == EvictionPolicy::Noeviction {
            return Err(KeyspaceError::OutOfMemory);
        }

        let mut freed = 0;
        let mut evicted = 0;
        while freed < to_free {
            let Some(key) = self.select_victim(db) else {
                break;
            };
            let before = db.used_memory();
            db.delete_key(&key);
            freed += before.saturating_sub(db.used_memory());
            evicted += 1;
            on_evict(&key);
        }
        self.evicted_keys += evicted as u64;

        if freed < to_free {
            warn!(freed, to_free, evicted, "unable to free enough memory");
            return Err(KeyspaceError::OutOfMemory);
        }
        debug!(freed, evicted, used = db.used_memory(), "evicted keys");
        Ok(evicted)
    }

    fn select_victim(&mut self, db: &mut Database) -> Option<String> {
        if db.is_empty() {
            return None;
        }
        match self.config.policy {
            EvictionPolicy::AllkeysLru => self.lru_victim(db),
            EvictionPolicy::AllkeysRandom => db
                .store_mut()
                .random_entry()
                .map(|e| e.key().to_owned()),
            EvictionPolicy::Noeviction => None,
        }
    }

    /// Refills the pool and pops the most idle candidate still present in
    /// the store. Candidates deleted since they were sampled are dropped.
    fn lru_victim(&mut self, db: &mut Database) -> Option<String> {
        for _ in 0..MAX_EMPTY_REFILLS {
            self.pool
                .populate(db.store_mut(), self.config.samples, now_ms());
            while let Some(candidate) = self.pool.pop_best() {
                if db.store_mut().contains_key(&candidate.key) {
                    return Some(candidate.key);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::memory::entry_size;
    use crate::object::Object;
    use std::thread::sleep;
    use std::time::Duration;

    fn evictor(policy: EvictionPolicy, maxmemory: usize) -> Evictor {
        Evictor::new(EvictionConfig {
            maxmemory,
            policy,
            ..EvictionConfig::default()
        })
    }

    fn fill(db: &mut Database, prefix: &str, n: usize) {
        for i in 0..n {
            db.set_key(&format!("{}:{:04}", prefix, i), Object::string("value"));
        }
    }

    #[test]
    fn test_unlimited_and_within_budget() {
        let mut db = Database::default();
        fill(&mut db, "k", 100);

        assert_eq!(evictor(EvictionPolicy::AllkeysLru, 0).free_memory_if_needed(&mut db), Ok(0));
        let roomy = evictor(EvictionPolicy::Noeviction, db.used_memory());
        assert_eq!(roomy.excess(&db), 0);
        assert_eq!(db.len(), 100);
    }

    #[test]
    fn test_noeviction_rejects_when_over() {
        let mut db = Database::default();
        fill(&mut db, "k", 10);
        let mut ev = evictor(EvictionPolicy::Noeviction, 100);

        assert_eq!(ev.free_memory_if_needed(&mut db), Err(KeyspaceError::OutOfMemory));
        assert_eq!(db.len(), 10);
    }

    #[test]
    fn test_lru_brings_memory_under_budget() {
        let mut db = Database::default();
        fill(&mut db, "k", 1000);
        let per_key = entry_size("k:0000", &Object::string("value"));
        let budget = db.used_memory() / 2 + 17;
        let mut ev = evictor(EvictionPolicy::AllkeysLru, budget);

        let to_free = db.used_memory() - budget;
        let evicted = ev.free_memory_if_needed(&mut db).unwrap();

        assert!(db.used_memory() <= budget);
        // never more than one key past the deficit
        assert_eq!(evicted, (to_free + per_key - 1) / per_key);
        assert_eq!(db.len(), 1000 - evicted);
        assert_eq!(ev.evicted_keys(), evicted as u64);
    }

    #[test]
    fn test_lru_prefers_idle_keys() {
        let mut db = Database::default();
        fill(&mut db, "old", 200);
        sleep(Duration::from_millis(50));
        fill(&mut db, "new", 200);

        let per_key = entry_size("old:0000", &Object::string("value"));
        let budget = db.used_memory() - 100 * per_key;
        let mut ev = evictor(EvictionPolicy::AllkeysLru, budget);
        assert_eq!(ev.free_memory_if_needed(&mut db), Ok(100));

        let new_left = (0..200)
            .filter(|i| db.exists(&format!("new:{:04}", i)))
            .count();
        assert!(new_left >= 190, "only {} recent keys survived", new_left);
    }

    #[test]
    fn test_random_policy() {
        let mut db = Database::default();
        fill(&mut db, "k", 500);
        let budget = db.used_memory() / 4;
        let mut ev = evictor(EvictionPolicy::AllkeysRandom, budget);

        assert!(ev.free_memory_if_needed(&mut db).unwrap() > 0);
        assert!(db.used_memory() <= budget);
    }

    #[test]
    fn test_budget_below_one_key_empties_store() {
        let mut db = Database::default();
        fill(&mut db, "k", 3);
        let mut ev = evictor(EvictionPolicy::AllkeysLru, 1);

        assert_eq!(ev.free_memory_if_needed(&mut db), Ok(3));
        assert!(db.is_empty());
        assert_eq!(ev.free_memory_if_needed(&mut db), Ok(0));
    }
}
