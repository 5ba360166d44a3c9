//! # Stage: Experiment
//!
//! ## Responsibility
//! Named experiment lifecycle on top of the key-value store: definition,
//! persistence, lookup, redefinition, versioning, winner override, reset and
//! delete. The control is always the first declared alternative.
//!
//! ## Guarantees
//! - At least two alternatives, validated at construction
//! - `save()` is idempotent: the persisted list is never duplicated
//! - `version` grows by exactly 1 on every `reset()` and `delete()`
//! - A changed alternative list is handled by [`Experiment::redefine`], which
//!   wipes the old counters and bumps the version
//!
//! ## NOT Responsible For
//! - Counting participation or completion (see [`crate::engine`])
//! - Session bookkeeping (see [`crate::session`])

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::alternative::Alternative;
use crate::definition::{self, AlternativeDef};
use crate::error::{Result, SplitError};
use crate::session::versioned_key;
use crate::store::{
    parse_count, version_key, KeyValueStore, KEY_EXPERIMENTS, KEY_START_TIMES, KEY_WINNERS,
};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A named experiment and its ordered alternatives.
///
/// Weights live only on this in-memory value; the store records names.
#[derive(Clone)]
pub struct Experiment {
    name: String,
    definitions: Vec<AlternativeDef>,
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("definitions", &self.definitions)
            .finish()
    }
}

impl Experiment {
    /// Build an experiment value without persisting it.
    pub fn create<I, D>(
        store: Arc<dyn KeyValueStore>,
        name: impl Into<String>,
        defs: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: Into<AlternativeDef>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(SplitError::InvalidDefinition(
                "experiment name must not be empty".into(),
            ));
        }
        Ok(Self {
            name,
            definitions: definition::normalize(defs)?,
            store,
        })
    }

    /// Load a saved experiment, or `None` if nothing is stored under `name`.
    pub fn find(store: Arc<dyn KeyValueStore>, name: &str) -> Result<Option<Self>> {
        if !store.exists(name)? {
            return Ok(None);
        }
        let names = store.list_range(name, 0, -1)?;
        if names.len() < 2 {
            return Err(SplitError::corrupt(
                name,
                format!("expected at least 2 alternatives, found {}", names.len()),
            ));
        }
        Ok(Some(Self {
            name: name.to_string(),
            definitions: names.into_iter().map(AlternativeDef::from).collect(),
            store,
        }))
    }

    /// Fetch `name`, creating it if absent and redefining it if the stored
    /// alternative list differs from `defs`.
    ///
    /// The returned value carries the caller's weights.
    pub fn find_or_create<I, D>(
        store: Arc<dyn KeyValueStore>,
        name: &str,
        defs: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: Into<AlternativeDef>,
    {
        let requested = Self::create(Arc::clone(&store), name, defs)?;
        match Self::find(Arc::clone(&store), name)? {
            Some(mut existing) => {
                if existing.alternative_names() != requested.alternative_names() {
                    existing.redefine(requested.definitions)?;
                    Ok(existing)
                } else {
                    Ok(requested)
                }
            }
            None => {
                requested.save()?;
                tracing::info!(
                    target: "splitkit::experiment",
                    experiment = %requested.name,
                    alternatives = ?requested.alternative_names(),
                    "created experiment"
                );
                Ok(requested)
            }
        }
    }

    /// Every saved experiment, sorted by name.
    pub fn all(store: Arc<dyn KeyValueStore>) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        for name in store.set_members(KEY_EXPERIMENTS)? {
            if let Some(exp) = Self::find(Arc::clone(&store), &name)? {
                out.push(exp);
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definitions(&self) -> &[AlternativeDef] {
        &self.definitions
    }

    pub fn alternative_names(&self) -> Vec<String> {
        definition::names(&self.definitions)
    }

    pub fn alternatives(&self) -> Vec<Alternative> {
        self.definitions
            .iter()
            .map(|d| self.alternative(&d.name))
            .collect()
    }

    /// The first declared alternative.
    pub fn control(&self) -> Alternative {
        self.alternative(&self.definitions[0].name)
    }

    pub fn has_alternative(&self, name: &str) -> bool {
        self.definitions.iter().any(|d| d.name == name)
    }

    fn alternative(&self, name: &str) -> Alternative {
        Alternative::new(Arc::clone(&self.store), self.name.clone(), name)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the alternative list and record the start time if none exists.
    pub fn save(&self) -> Result<()> {
        let names = self.alternative_names();
        let stored = self.store.list_range(&self.name, 0, -1)?;
        if stored != names {
            if !stored.is_empty() {
                self.store.delete(&[&self.name])?;
            }
            for n in &names {
                self.store.list_push(&self.name, n)?;
            }
        }
        self.store.set_add(KEY_EXPERIMENTS, &self.name)?;
        if self.store.hash_get(KEY_START_TIMES, &self.name)?.is_none() {
            self.store
                .hash_set(KEY_START_TIMES, &self.name, &now_ms().to_string())?;
        }
        Ok(())
    }

    pub fn is_saved(&self) -> Result<bool> {
        self.store.exists(&self.name)
    }

    /// Start time in Unix milliseconds, if the experiment was ever saved.
    pub fn start_time(&self) -> Result<Option<u64>> {
        match self.store.hash_get(KEY_START_TIMES, &self.name)? {
            None => Ok(None),
            Some(raw) => parse_count(KEY_START_TIMES, Some(raw)).map(Some),
        }
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    pub fn version(&self) -> Result<u64> {
        let key = version_key(&self.name);
        parse_count(&key, self.store.get(&key)?)
    }

    pub fn increment_version(&self) -> Result<u64> {
        let v = self.store.incr(&version_key(&self.name))?;
        Ok(v.max(0) as u64)
    }

    /// Session key for the current version.
    pub fn key(&self) -> Result<String> {
        Ok(versioned_key(&self.name, self.version()?))
    }

    // -----------------------------------------------------------------------
    // Winner
    // -----------------------------------------------------------------------

    pub fn winner(&self) -> Result<Option<String>> {
        self.store.hash_get(KEY_WINNERS, &self.name)
    }

    pub fn set_winner(&self, alternative: &str) -> Result<()> {
        if !self.has_alternative(alternative) {
            return Err(SplitError::UnknownWinner {
                experiment: self.name.clone(),
                alternative: alternative.to_string(),
            });
        }
        self.store.hash_set(KEY_WINNERS, &self.name, alternative)?;
        tracing::info!(
            target: "splitkit::experiment",
            experiment = %self.name,
            winner = %alternative,
            "winner set"
        );
        Ok(())
    }

    pub fn reset_winner(&self) -> Result<()> {
        self.store.hash_delete(KEY_WINNERS, &self.name)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// The winner if one is set, otherwise a weighted random pick.
    ///
    /// Pure with respect to counters: the caller decides whether the pick
    /// counts as a participation.
    pub fn next_alternative<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Alternative> {
        if let Some(winner) = self.winner()? {
            return Ok(self.alternative(&winner));
        }
        Ok(self.pick(rng))
    }

    pub(crate) fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Alternative {
        let sample: f64 = rng.gen();
        let idx = definition::pick_weighted(&self.definitions, sample);
        self.alternative(&self.definitions[idx].name)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Zero every alternative's counters, clear the winner and bump the version.
    pub fn reset(&self) -> Result<u64> {
        for alt in self.alternatives() {
            alt.reset()?;
        }
        self.reset_winner()?;
        let version = self.increment_version()?;
        tracing::info!(
            target: "splitkit::experiment",
            experiment = %self.name,
            version,
            "experiment reset"
        );
        Ok(version)
    }

    /// Replace the alternative list. The old alternatives' counters are
    /// removed, the winner is cleared and the version is bumped once.
    pub fn redefine<I, D>(&mut self, defs: I) -> Result<u64>
    where
        I: IntoIterator<Item = D>,
        D: Into<AlternativeDef>,
    {
        let defs = definition::normalize(defs)?;
        let old = self.alternatives();
        let version = self.reset()?;
        for alt in &old {
            alt.purge()?;
        }
        self.definitions = defs;
        self.save()?;
        tracing::info!(
            target: "splitkit::experiment",
            experiment = %self.name,
            version,
            alternatives = ?self.alternative_names(),
            "experiment redefined"
        );
        Ok(version)
    }

    /// Remove the experiment and bump its version so outstanding session
    /// assignments go stale. Counter hashes, winner and start time are purged;
    /// the version key survives so a re-created experiment keeps counting up.
    pub fn delete(&self) -> Result<u64> {
        for alt in self.alternatives() {
            alt.purge()?;
        }
        self.reset_winner()?;
        self.store.hash_delete(KEY_START_TIMES, &self.name)?;
        self.store.delete(&[&self.name])?;
        self.store.set_remove(KEY_EXPERIMENTS, &self.name)?;
        let version = self.increment_version()?;
        tracing::info!(
            target: "splitkit::experiment",
            experiment = %self.name,
            version,
            "experiment deleted"
        );
        Ok(version)
    }
}
