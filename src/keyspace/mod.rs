//! Keyspace
//!
//! A [`Database`] pairs two dicts:
//!
//! ```text
//!   store    key ──► Object        (every live key)
//!   expires  key ──► i64 (UNIX ms) (only keys with a TTL)
//! ```
//!
//! A key in `expires` is always present in `store`. A key without an expiry
//! record lives until it is deleted or evicted.
//!
//! ## Expiration
//!
//! Keys expire in two ways:
//!
//! - **Passive**: every [`Database::lookup`] checks the expiry record first
//!   and deletes a key whose time has passed before anything else sees it.
//! - **Active**: [`Database::active_expire_cycle`] samples the expiry index
//!   from the maintenance cron and deletes what it finds expired. It keeps
//!   sampling while a large share of each sample was expired, within a fixed
//!   time budget, so a key that is never read again is still reclaimed.
//!
//! All methods take `&mut self`: the database is owned by the event loop and
//! is never shared between tasks.

mod list;
pub mod memory;
mod string;

pub use list::ListEnd;
pub use memory::MemoryTracker;

use crate::dict::{Dict, DICT_HT_INITIAL_SIZE};
use crate::object::Object;
use crate::time::now_ms;
use memory::entry_size;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Tuning knobs for a [`Database`].
#[derive(Debug, Clone)]
pub struct KeyspaceConfig {
    /// Minimum bucket count of both dicts.
    pub min_table_size: usize,
    /// Expiry records sampled per active expiration round.
    pub expire_lookups: usize,
    /// Wall-clock budget of one active expiration cycle.
    pub expire_budget: Duration,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            min_table_size: DICT_HT_INITIAL_SIZE,
            expire_lookups: 20,
            expire_budget: Duration::from_millis(25),
        }
    }
}

/// Point-in-time counters of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Live keys in the store
    pub keys: usize,
    /// Keys carrying an expiry time
    pub expires: usize,
    /// Tracked memory in bytes
    pub used_memory: usize,
    /// Keys removed by passive or active expiration
    pub expired_keys: u64,
}

/// The keyspace: primary store plus expiry index.
#[derive(Debug)]
pub struct Database {
    store: Dict<Object>,
    expires: Dict<i64>,
    memory: MemoryTracker,
    config: KeyspaceConfig,
    /// Set while replaying the append-only file.
    loading: bool,
    expired_keys: u64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(KeyspaceConfig::default())
    }
}

impl Database {
    pub fn new(config: KeyspaceConfig) -> Self {
        Self {
            store: Dict::with_min_size(config.min_table_size),
            expires: Dict::with_min_size(config.min_table_size),
            memory: MemoryTracker::new(),
            config,
            loading: false,
            expired_keys: 0,
        }
    }

    /// Enters or leaves loading mode. While loading, lookups neither touch
    /// access times nor expire keys, so replayed expiry times that already
    /// passed are installed as they were logged.
    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Number of keys, including expired keys not yet reclaimed.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of keys with an expiry record.
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    pub fn used_memory(&self) -> usize {
        self.memory.used_bytes()
    }

    pub fn stats(&self) -> KeyspaceStats {
        KeyspaceStats {
            keys: self.store.len(),
            expires: self.expires.len(),
            used_memory: self.memory.used_bytes(),
            expired_keys: self.expired_keys,
        }
    }

    /// The primary store, for samplers that only read it.
    pub(crate) fn store_mut(&mut self) -> &mut Dict<Object> {
        &mut self.store
    }

    // ------------------------------------------------------------------
    // Lookup and write
    // ------------------------------------------------------------------

    /// Looks up `key`, deleting it first if its expiry time has passed.
    ///
    /// With `touch` set, the object's access time is refreshed unless the
    /// database is loading.
    pub fn lookup(&mut self, key: &str, touch: bool) -> Option<&mut Object> {
        if self.expire_if_needed(key) {
            return None;
        }
        let loading = self.loading;
        let obj = self.store.get_mut(key)?;
        if touch && !loading {
            obj.touch();
        }
        Some(obj)
    }

    /// Whether `key` is live. Does not count as an access.
    pub fn exists(&mut self, key: &str) -> bool {
        self.lookup(key, false).is_some()
    }

    /// Stores `obj` under `key`.
    ///
    /// An existing object has its payload replaced in place: the access time
    /// is carried over, the reference count grows and any TTL is removed.
    pub fn set_key(&mut self, key: &str, obj: Object) {
        self.expire_if_needed(key);

        if let Some(existing) = self.store.get_mut(key) {
            let before = entry_size(key, existing);
            existing.overwrite(obj);
            self.memory.adjust(before, entry_size(key, existing));
            self.remove_expire(key);
        } else {
            self.memory.add(key, &obj);
            self.store.add(key.to_owned(), obj);
        }
    }

    /// Inserts a fresh object for a key known to be absent.
    pub(crate) fn insert_new(&mut self, key: &str, obj: Object) {
        self.memory.add(key, &obj);
        self.store.add(key.to_owned(), obj);
    }

    /// Deletes `key` and its expiry record. Returns whether it existed.
    pub fn delete_key(&mut self, key: &str) -> bool {
        self.remove_expire(key);
        match self.store.delete(key) {
            Some(obj) => {
                self.memory.remove(key, &obj);
                true
            }
            None => false,
        }
    }

    /// Runs `f` on the object stored at `key` and charges the size change
    /// to the memory tracker.
    pub(crate) fn track_mutation<T>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Object) -> T,
    ) -> Option<T> {
        let obj = self.store.get_mut(key)?;
        let before = entry_size(key, obj);
        let result = f(obj);
        self.memory.adjust(before, entry_size(key, obj));
        Some(result)
    }

    /// Drops every key. Returns how many there were.
    pub fn flush(&mut self) -> usize {
        let removed = self.store.len();
        self.store.clear();
        self.expires.clear();
        self.memory.reset();
        removed
    }

    /// A random live key, reclaiming expired keys it runs into.
    pub fn random_key(&mut self) -> Option<String> {
        loop {
            let key = self.store.random_entry()?.key().to_owned();
            if !self.expire_if_needed(&key) {
                return Some(key);
            }
        }
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    /// Records that `key` expires at `when` (UNIX ms). Returns `false`
    /// without effect when the key does not exist.
    pub fn set_expire(&mut self, key: &str, when: i64) -> bool {
        if !self.store.contains_key(key) {
            return false;
        }
        if self.expires.add(key.to_owned(), when).is_none() {
            self.memory.add_expiry(key);
        }
        true
    }

    /// The absolute expiry time of `key`, or `-1` when it has none.
    pub fn get_expire(&mut self, key: &str) -> i64 {
        self.expires.get(key).copied().unwrap_or(-1)
    }

    fn remove_expire(&mut self, key: &str) -> bool {
        if self.expires.delete(key).is_some() {
            self.memory.remove_expiry(key);
            true
        } else {
            false
        }
    }

    /// Removes the TTL of a live key. Returns whether one was removed.
    pub fn persist(&mut self, key: &str) -> bool {
        self.lookup(key, false).is_some() && self.remove_expire(key)
    }

    /// Remaining time to live in milliseconds: `-2` for a missing key,
    /// `-1` for a key without TTL.
    pub fn ttl_ms(&mut self, key: &str) -> i64 {
        if self.lookup(key, false).is_none() {
            return -2;
        }
        match self.get_expire(key) {
            -1 => -1,
            when => (when - now_ms()).max(0),
        }
    }

    /// Remaining time to live rounded to the nearest second, with the same
    /// `-2` and `-1` markers as [`Database::ttl_ms`].
    pub fn ttl_seconds(&mut self, key: &str) -> i64 {
        match self.ttl_ms(key) {
            ms if ms < 0 => ms,
            ms => (ms + 500) / 1000,
        }
    }

    fn key_is_expired(&mut self, key: &str) -> bool {
        let when = self.get_expire(key);
        when >= 0 && now_ms() > when
    }

    /// Deletes `key` if its expiry time has passed. Returns whether it did.
    fn expire_if_needed(&mut self, key: &str) -> bool {
        if self.loading || !self.key_is_expired(key) {
            return false;
        }
        self.delete_key(key);
        self.expired_keys += 1;
        trace!(key, "expired on access");
        true
    }

    /// Samples the expiry index and deletes expired keys.
    ///
    /// Each round samples `expire_lookups` records. Another round follows
    /// while more than a quarter of the last sample had expired and the
    /// time budget is not spent. Nothing is sampled when the index fills
    /// less than 1% of its buckets. Returns the number of keys deleted.
    pub fn active_expire_cycle(&mut self) -> usize {
        let used = self.expires.len();
        if used == 0 {
            return 0;
        }
        let slots = self.expires.slots();
        if slots > DICT_HT_INITIAL_SIZE && used * 100 / slots < 1 {
            return 0;
        }

        let start = Instant::now();
        let mut total = 0;
        loop {
            let now = now_ms();
            let sample = self.expires.sample_entries(self.config.expire_lookups);
            let sampled = sample.len();
            let expired: Vec<String> = sample
                .into_iter()
                .filter(|e| now > *e.value())
                .map(|e| e.key().to_owned())
                .collect();

            let mut deleted = 0;
            for key in &expired {
                if self.delete_key(key) {
                    deleted += 1;
                }
            }
            total += deleted;
            self.expired_keys += deleted as u64;

            if sampled == 0 || deleted * 4 <= sampled {
                break;
            }
            if start.elapsed() >= self.config.expire_budget {
                debug!(expired = total, "active expire cycle hit its time budget");
                break;
            }
        }

        if total > 0 {
            debug!(expired = total, remaining = self.expires.len(), "active expire cycle");
        }
        total
    }

    // ------------------------------------------------------------------
    // Table maintenance
    // ------------------------------------------------------------------

    /// Spends up to `budget` moving buckets of whichever dict is rehashing,
    /// the store first. Returns whether any work was done.
    pub fn rehash_step(&mut self, budget: Duration) -> bool {
        if self.store.is_rehashing() {
            self.store.rehash_for(budget);
            if !self.store.is_rehashing() {
                debug!(slots = self.store.slots(), keys = self.store.len(), "store rehash complete");
            }
            true
        } else if self.expires.is_rehashing() {
            self.expires.rehash_for(budget);
            true
        } else {
            false
        }
    }

    /// Starts shrinking whichever dict has become sparse.
    pub fn resize_if_needed(&mut self) {
        if self.store.resize_to_fit() {
            debug!(keys = self.store.len(), "shrinking store");
        }
        self.expires.resize_to_fit();
    }

    /// Whether either dict is mid-rehash.
    pub fn is_rehashing(&self) -> bool {
        self.store.is_rehashing() || self.expires.is_rehashing()
    }
}
