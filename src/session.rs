//! # Stage: Session Record
//!
//! ## Responsibility
//! The small per-user state the engine reads and writes on every call:
//! versioned experiment key → assigned alternative, plus the set of keys
//! already marked finished. The record is owned by the caller (normally an
//! HTTP session) and passed to the engine explicitly.
//!
//! ## Guarantees
//! - At most one assignment per experiment: stale version keys are pruned
//!   whenever the current key is established
//! - Serialisable: round-trips through any [`SessionStore`] as JSON
//!
//! ## NOT Responsible For
//! - Cookie signing, expiry or transport (the web layer's concern)

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitError};

/// Session key under which assignments are stored.
pub const SESSION_KEY_ASSIGNMENTS: &str = "split";
/// Session key under which finished markers are stored.
pub const SESSION_KEY_FINISHED: &str = "split_finished";

/// `name` for version 0, `name:version` afterwards.
pub fn versioned_key(experiment: &str, version: u64) -> String {
    if version == 0 {
        experiment.to_string()
    } else {
        format!("{experiment}:{version}")
    }
}

/// The experiment name a session key belongs to.
///
/// Only a purely numeric suffix counts as a version, so experiment names may
/// themselves contain colons.
pub fn experiment_of(key: &str) -> &str {
    match key.rsplit_once(':') {
        Some((base, suffix))
            if !base.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => key,
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Per-user key-value storage provided by the hosting framework.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

impl SessionStore for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        HashMap::remove(self, key);
    }
}

// ---------------------------------------------------------------------------
// SessionRecord
// ---------------------------------------------------------------------------

/// Assignments and finished markers for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    assignments: BTreeMap<String, String>,
    #[serde(default)]
    finished: BTreeSet<String>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the record out of a framework session; missing keys mean empty.
    pub fn load(session: &dyn SessionStore) -> Result<Self> {
        let assignments = match session.get(SESSION_KEY_ASSIGNMENTS) {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                SplitError::corrupt(SESSION_KEY_ASSIGNMENTS, e.to_string())
            })?,
            None => BTreeMap::new(),
        };
        let finished = match session.get(SESSION_KEY_FINISHED) {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| SplitError::corrupt(SESSION_KEY_FINISHED, e.to_string()))?,
            None => BTreeSet::new(),
        };
        Ok(Self {
            assignments,
            finished,
        })
    }

    /// Write the record back into a framework session.
    pub fn store(&self, session: &mut dyn SessionStore) -> Result<()> {
        let assignments = serde_json::to_string(&self.assignments)
            .map_err(|e| SplitError::corrupt(SESSION_KEY_ASSIGNMENTS, e.to_string()))?;
        session.set(SESSION_KEY_ASSIGNMENTS, assignments);
        if self.finished.is_empty() {
            session.remove(SESSION_KEY_FINISHED);
        } else {
            let finished = serde_json::to_string(&self.finished)
                .map_err(|e| SplitError::corrupt(SESSION_KEY_FINISHED, e.to_string()))?;
            session.set(SESSION_KEY_FINISHED, finished);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.finished.is_empty()
    }

    /// Alternative assigned under an exact versioned key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.assignments.get(key).map(String::as_str)
    }

    pub fn assign(&mut self, key: &str, alternative: &str) {
        self.assignments
            .insert(key.to_string(), alternative.to_string());
    }

    pub fn assignments(&self) -> impl Iterator<Item = (&str, &str)> {
        self.assignments
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Every recorded key (any version) belonging to `experiment`.
    pub fn keys_for(&self, experiment: &str) -> Vec<String> {
        self.assignments
            .keys()
            .filter(|k| experiment_of(k) == experiment)
            .cloned()
            .collect()
    }

    /// Distinct experiment names the session holds assignments for.
    pub fn experiments(&self) -> BTreeSet<String> {
        self.assignments
            .keys()
            .map(|k| experiment_of(k).to_string())
            .collect()
    }

    pub fn has_experiment(&self, experiment: &str) -> bool {
        self.assignments
            .keys()
            .any(|k| experiment_of(k) == experiment)
    }

    /// `true` if the session participates in any experiment other than `experiment`.
    pub fn in_other_experiment(&self, experiment: &str) -> bool {
        self.assignments
            .keys()
            .any(|k| experiment_of(k) != experiment)
    }

    /// Drop every key of `experiment` except `current_key`. Returns how many
    /// stale keys were removed.
    pub fn prune_stale(&mut self, experiment: &str, current_key: &str) -> usize {
        let stale: Vec<String> = self
            .keys_for(experiment)
            .into_iter()
            .filter(|k| k != current_key)
            .collect();
        for key in &stale {
            self.assignments.remove(key);
            self.finished.remove(key);
        }
        stale.len()
    }

    /// Forget every key of `experiment`. Returns how many were removed.
    pub fn remove_experiment(&mut self, experiment: &str) -> usize {
        let keys = self.keys_for(experiment);
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    /// Forget the assignment and finished marker under `key`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.finished.remove(key);
        self.assignments.remove(key)
    }

    pub fn is_finished(&self, key: &str) -> bool {
        self.finished.contains(key)
    }

    pub fn mark_finished(&mut self, key: &str) {
        self.finished.insert(key.to_string());
    }
}
