//! Byte accounting for the keyspace.
//!
//! The tracker is updated explicitly on every mutation, so reading the
//! current usage never scans the store. Eviction measures what it freed as
//! the difference in [`MemoryTracker::used_bytes`] around each deletion.

use crate::object::Object;

/// Estimated cost of a store entry beyond its key and object: the boxed
/// chain node, the cached hash and the bucket slot.
pub(crate) const ENTRY_OVERHEAD: usize = 64;

/// Estimated cost of an expiry index record beyond its key.
pub(crate) const EXPIRY_OVERHEAD: usize = 48;

/// Running total of the memory held by one database.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    used_bytes: usize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn reset(&mut self) {
        self.used_bytes = 0;
    }

    /// Records a new store entry.
    pub fn add(&mut self, key: &str, obj: &Object) {
        self.used_bytes += entry_size(key, obj);
    }

    /// Records the removal of a store entry.
    pub fn remove(&mut self, key: &str, obj: &Object) {
        self.used_bytes = self.used_bytes.saturating_sub(entry_size(key, obj));
    }

    /// Records an in-place change of an entry from `old_size` to `new_size`
    /// bytes, both as returned by [`entry_size`].
    pub fn adjust(&mut self, old_size: usize, new_size: usize) {
        self.used_bytes = self
            .used_bytes
            .saturating_sub(old_size)
            .saturating_add(new_size);
    }

    pub fn add_expiry(&mut self, key: &str) {
        self.used_bytes += expiry_size(key);
    }

    pub fn remove_expiry(&mut self, key: &str) {
        self.used_bytes = self.used_bytes.saturating_sub(expiry_size(key));
    }
}

/// Estimated footprint of one store entry.
pub fn entry_size(key: &str, obj: &Object) -> usize {
    key.len() + obj.memory_usage() + ENTRY_OVERHEAD
}

/// Estimated footprint of one expiry record.
pub fn expiry_size(key: &str) -> usize {
    key.len() + EXPIRY_OVERHEAD
}
