//! # Stage: Key-Value Store Abstraction
//!
//! ## Responsibility
//! The one shared mutable resource of the engine. Everything durable
//! (alternative lists, counters, versions, winners, start times) lives behind
//! [`KeyValueStore`]; `Experiment` and `Alternative` are transient views.
//!
//! ## Guarantees
//! - Atomic increments: `incr` / `hash_incr` never lose concurrent updates
//! - Thread-safe: implementations are `Send + Sync` and take `&self`
//! - Non-panicking: connectivity problems surface as
//!   [`SplitError::StoreUnavailable`](crate::error::SplitError::StoreUnavailable)
//!
//! ## NOT Responsible For
//! - Retrying failed calls (the engine fails over or propagates immediately)
//! - Multi-key transactions (no operation in the engine needs one)

pub mod memory;

#[cfg(feature = "redis-backing")]
pub mod redis_store;

use std::collections::{BTreeSet, HashMap};

use crate::error::Result;

pub use memory::MemoryStore;

#[cfg(feature = "redis-backing")]
pub use redis_store::RedisStore;

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// Set of every saved experiment name.
pub const KEY_EXPERIMENTS: &str = "experiments";
/// Hash: experiment name → start time (unix ms).
pub const KEY_START_TIMES: &str = "experiment_start_times";
/// Hash: experiment name → winning alternative.
pub const KEY_WINNERS: &str = "experiment_winner";

pub const FIELD_PARTICIPANTS: &str = "participant_count";
pub const FIELD_COMPLETED: &str = "completed_count";

/// Suffix of the version key; reserved as an alternative name.
pub const VERSION_SUFFIX: &str = "version";

/// Integer key holding an experiment's version (absent means 0).
pub fn version_key(experiment: &str) -> String {
    format!("{experiment}:{VERSION_SUFFIX}")
}

/// Hash key holding one alternative's counters.
pub fn alternative_key(experiment: &str, alternative: &str) -> String {
    format!("{experiment}:{alternative}")
}

// ---------------------------------------------------------------------------
// KeyValueStore trait
// ---------------------------------------------------------------------------

/// Operations the engine needs from its durable store.
///
/// Modelled on the Redis command set but not tied to it: [`MemoryStore`] is
/// a complete in-process implementation. Implementations synchronise
/// internally; callers never hold a lock across a call.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn exists(&self, key: &str) -> Result<bool>;
    /// Remove the given keys, returning how many existed.
    fn delete(&self, keys: &[&str]) -> Result<usize>;
    /// Atomically increment an integer key (absent counts as 0).
    fn incr(&self, key: &str) -> Result<i64>;

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;
    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;
    fn hash_delete(&self, key: &str, field: &str) -> Result<()>;
    /// Atomically add `by` to a hash field (absent counts as 0).
    fn hash_incr(&self, key: &str, field: &str, by: i64) -> Result<i64>;
    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Append to the tail of a list.
    fn list_push(&self, key: &str, value: &str) -> Result<()>;
    /// Inclusive range with Redis semantics (negative indices count from the end).
    fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    fn set_add(&self, key: &str, member: &str) -> Result<()>;
    fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    fn set_members(&self, key: &str) -> Result<BTreeSet<String>>;
}

/// Parse an integer stored as text; absent means 0.
pub(crate) fn parse_count(key: &str, raw: Option<String>) -> Result<u64> {
    match raw {
        None => Ok(0),
        Some(s) => s
            .trim()
            .parse::<i64>()
            .map(|v| v.max(0) as u64)
            .map_err(|e| crate::error::SplitError::corrupt(key, e.to_string())),
    }
}
