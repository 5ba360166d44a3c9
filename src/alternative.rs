//! # Stage: Alternative
//!
//! ## Responsibility
//! A transient view over one variant's persisted counters. The store owns the
//! data; an `Alternative` is cheap to construct and holds no counter state of
//! its own, so two views of the same alternative always agree.
//!
//! ## Guarantees
//! - Counters only move through the store's atomic `hash_incr`
//! - Absent counters read as 0
//! - `conversion_rate` never divides by zero
//!
//! ## NOT Responsible For
//! - Deciding when to count (see [`crate::engine`])
//! - Enforcing `completed <= participants` (counted independently)

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::stats;
use crate::store::{
    alternative_key, parse_count, KeyValueStore, FIELD_COMPLETED, FIELD_PARTICIPANTS,
};

/// One arm of an experiment, addressed by `experiment_name:name`.
#[derive(Clone)]
pub struct Alternative {
    name: String,
    experiment_name: String,
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternative")
            .field("name", &self.name)
            .field("experiment_name", &self.experiment_name)
            .finish()
    }
}

impl Alternative {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        experiment_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            experiment_name: experiment_name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Store key of this alternative's counter hash.
    pub fn key(&self) -> String {
        alternative_key(&self.experiment_name, &self.name)
    }

    pub fn participant_count(&self) -> Result<u64> {
        self.read(FIELD_PARTICIPANTS)
    }

    pub fn completed_count(&self) -> Result<u64> {
        self.read(FIELD_COMPLETED)
    }

    pub fn increment_participation(&self) -> Result<u64> {
        self.bump(FIELD_PARTICIPANTS)
    }

    pub fn increment_completion(&self) -> Result<u64> {
        self.bump(FIELD_COMPLETED)
    }

    /// Zero both counters.
    pub fn reset(&self) -> Result<()> {
        let key = self.key();
        self.store.hash_set(&key, FIELD_PARTICIPANTS, "0")?;
        self.store.hash_set(&key, FIELD_COMPLETED, "0")
    }

    /// Remove the counter hash entirely.
    pub(crate) fn purge(&self) -> Result<()> {
        self.store.delete(&[&self.key()]).map(|_| ())
    }

    /// `true` iff this alternative is the first one the experiment declares.
    pub fn is_control(&self) -> Result<bool> {
        let first = self.store.list_range(&self.experiment_name, 0, 0)?;
        Ok(first.first().map(String::as_str) == Some(self.name.as_str()))
    }

    /// The experiment's control, looked up by name.
    pub fn control(&self) -> Result<Option<Alternative>> {
        let first = self.store.list_range(&self.experiment_name, 0, 0)?;
        Ok(first.into_iter().next().map(|control| {
            Alternative::new(Arc::clone(&self.store), self.experiment_name.clone(), control)
        }))
    }

    pub fn conversion_rate(&self) -> Result<f64> {
        Ok(self.counts()?.conversion_rate())
    }

    /// Two-proportion z-score against the experiment's control.
    ///
    /// Uses the unpooled standard error on purpose (see [`stats::z_score`]);
    /// [`stats::pooled_z_score`] gives the pooled-proportion form.
    ///
    /// `None` for the control itself, when either side has no participants,
    /// or when the standard error is zero.
    pub fn z_score(&self) -> Result<Option<f64>> {
        let control = match self.control()? {
            Some(c) if c.name != self.name => c,
            _ => return Ok(None),
        };
        let mine = self.counts()?;
        let theirs = control.counts()?;
        Ok(stats::z_score(mine, theirs))
    }

    /// Both counters, read in one round trip.
    pub fn counts(&self) -> Result<stats::Counts> {
        let key = self.key();
        let hash = self.store.hash_get_all(&key)?;
        Ok(stats::Counts {
            completed: parse_count(&key, hash.get(FIELD_COMPLETED).cloned())?,
            participants: parse_count(&key, hash.get(FIELD_PARTICIPANTS).cloned())?,
        })
    }

    fn read(&self, field: &str) -> Result<u64> {
        let key = self.key();
        parse_count(&key, self.store.hash_get(&key, field)?)
    }

    fn bump(&self, field: &str) -> Result<u64> {
        let next = self.store.hash_incr(&self.key(), field, 1)?;
        Ok(next.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn alt(store: &Arc<MemoryStore>, exp: &str, name: &str) -> Alternative {
        Alternative::new(store.clone(), exp, name)
    }

    fn declare(store: &MemoryStore, exp: &str, names: &[&str]) {
        for n in names {
            store.list_push(exp, n).unwrap();
        }
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    #[test]
    fn test_counts_default_to_zero() {
        let s = store();
        let a = alt(&s, "link_color", "blue");
        assert_eq!(a.participant_count().unwrap(), 0);
        assert_eq!(a.completed_count().unwrap(), 0);
    }

    #[test]
    fn test_increments_are_persisted() {
        let s = store();
        let a = alt(&s, "link_color", "blue");
        a.increment_participation().unwrap();
        a.increment_participation().unwrap();
        a.increment_completion().unwrap();
        let again = alt(&s, "link_color", "blue");
        assert_eq!(again.participant_count().unwrap(), 2);
        assert_eq!(again.completed_count().unwrap(), 1);
    }

    #[test]
    fn test_reset_zeroes_both_counters() {
        let s = store();
        let a = alt(&s, "link_color", "blue");
        a.increment_participation().unwrap();
        a.increment_completion().unwrap();
        a.reset().unwrap();
        assert_eq!(a.participant_count().unwrap(), 0);
        assert_eq!(a.completed_count().unwrap(), 0);
    }

    #[test]
    fn test_key_is_composite() {
        let s = store();
        assert_eq!(alt(&s, "link_color", "blue").key(), "link_color:blue");
    }

    // -----------------------------------------------------------------------
    // Control lookup
    // -----------------------------------------------------------------------

    #[test]
    fn test_first_declared_is_control() {
        let s = store();
        declare(&s, "link_color", &["blue", "red"]);
        assert!(alt(&s, "link_color", "blue").is_control().unwrap());
        assert!(!alt(&s, "link_color", "red").is_control().unwrap());
    }

    #[test]
    fn test_unsaved_experiment_has_no_control() {
        let s = store();
        assert!(!alt(&s, "ghost", "blue").is_control().unwrap());
        assert!(alt(&s, "ghost", "blue").control().unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    #[test]
    fn test_conversion_rate_zero_participants() {
        let s = store();
        assert_eq!(alt(&s, "e", "a").conversion_rate().unwrap(), 0.0);
    }

    #[test]
    fn test_conversion_rate_four_in_ten() {
        let s = store();
        let a = alt(&s, "e", "a");
        s.hash_set(&a.key(), FIELD_PARTICIPANTS, "10").unwrap();
        s.hash_set(&a.key(), FIELD_COMPLETED, "4").unwrap();
        assert!((a.conversion_rate().unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_control_z_score_is_none() {
        let s = store();
        declare(&s, "e", &["a", "b"]);
        let a = alt(&s, "e", "a");
        s.hash_set(&a.key(), FIELD_PARTICIPANTS, "10").unwrap();
        assert_eq!(a.z_score().unwrap(), None);
    }

    #[test]
    fn test_z_score_against_control() {
        let s = store();
        declare(&s, "e", &["control", "variant"]);
        let c = alt(&s, "e", "control");
        let v = alt(&s, "e", "variant");
        s.hash_set(&c.key(), FIELD_PARTICIPANTS, "182").unwrap();
        s.hash_set(&c.key(), FIELD_COMPLETED, "35").unwrap();
        s.hash_set(&v.key(), FIELD_PARTICIPANTS, "188").unwrap();
        s.hash_set(&v.key(), FIELD_COMPLETED, "61").unwrap();
        let z = v.z_score().unwrap().unwrap();
        assert_eq!(format!("{z:.2}"), "2.94");
    }
}
