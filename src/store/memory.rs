//! In-process [`KeyValueStore`] mirroring the Redis string/hash/list/set
//! commands the engine uses.
//!
//! Used in tests and single-process deployments. `set_available(false)`
//! makes every call fail with `StoreUnavailable`, which is how the failover
//! branch of the engine is exercised.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::KeyValueStore;
use crate::error::{Result, SplitError};

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn remove(&mut self, key: &str) -> bool {
        let mut found = self.strings.remove(key).is_some();
        found |= self.hashes.remove(key).is_some();
        found |= self.lists.remove(key).is_some();
        found |= self.sets.remove(key).is_some();
        found
    }

    fn all_keys(&self) -> BTreeSet<String> {
        self.strings
            .keys()
            .chain(self.hashes.keys())
            .chain(self.lists.keys())
            .chain(self.sets.keys())
            .cloned()
            .collect()
    }
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of trait calls made so far, including failed ones.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every key currently holding a value, sorted.
    pub fn keys(&self) -> BTreeSet<String> {
        self.lock_unchecked().all_keys()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(SplitError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(self.lock_unchecked())
    }

    fn lock_unchecked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(key: &str, raw: Option<&String>) -> Result<i64> {
    match raw {
        None => Ok(0),
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| SplitError::corrupt(key, "value is not an integer")),
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.strings.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let inner = self.lock()?;
        Ok(inner.strings.contains_key(key)
            || inner.hashes.contains_key(key)
            || inner.lists.contains_key(key)
            || inner.sets.contains_key(key))
    }

    fn delete(&self, keys: &[&str]) -> Result<usize> {
        let mut inner = self.lock()?;
        Ok(keys.iter().filter(|k| inner.remove(k)).count())
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.lock()?;
        let next = parse_int(key, inner.strings.get(key))? + 1;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.lock()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let now_empty = match inner.hashes.get_mut(key) {
            Some(h) => {
                h.remove(field);
                h.is_empty()
            }
            None => false,
        };
        // Redis drops a hash once its last field is gone.
        if now_empty {
            inner.hashes.remove(key);
        }
        Ok(())
    }

    fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut inner = self.lock()?;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let next = parse_int(key, hash.get(field))? + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.lock()?.hashes.get(key).cloned().unwrap_or_default())
    }

    fn list_push(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let list = match inner.lists.get(key) {
            Some(l) => l,
            None => return Ok(vec![]),
        };
        let len = list.len() as isize;
        let s = if start < 0 { (len + start).max(0) } else { start };
        let e = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if s > e || s >= len {
            return Ok(vec![]);
        }
        Ok(list[s as usize..=e as usize].to_vec())
    }

    fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.lock()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let now_empty = match inner.sets.get_mut(key) {
            Some(s) => {
                s.remove(member);
                s.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.sets.remove(key);
        }
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
