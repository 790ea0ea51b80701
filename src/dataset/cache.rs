use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// How many decoded patients an index keeps in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Every lookup reads from disk.
    #[default]
    Disabled,
    /// Keep every patient that has been read.
    Unbounded,
    /// Keep at most this many patients. Once full, further patients are read
    /// from disk on every lookup; nothing is evicted.
    Bounded(usize),
}

/// Immutable per-patient values shared between threads, keyed by patient id.
/// Entries are only removed by [`PatientCache::clear`].
#[derive(Debug)]
pub struct PatientCache<T> {
    policy: CachePolicy,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> PatientCache<T> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Whether a new entry would be kept.
    pub fn has_room(&self) -> bool {
        match self.policy {
            CachePolicy::Disabled => false,
            CachePolicy::Unbounded => true,
            CachePolicy::Bounded(capacity) => self.len() < capacity,
        }
    }

    /// Return the cached value for `key`, or compute it with `load`. The computed
    /// value is kept only if the policy has room for it.
    pub fn get_or_try_insert_with<E, F>(&self, key: &str, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = Arc::new(load()?);
        if !self.has_room() {
            return Ok(value);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have loaded the same key meanwhile
        if let Some(existing) = entries.get(key) {
            return Ok(existing.clone());
        }
        let full = match self.policy {
            CachePolicy::Bounded(capacity) => entries.len() >= capacity,
            _ => false,
        };
        if !full {
            entries.insert(key.to_string(), value.clone());
        }
        Ok(value)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
