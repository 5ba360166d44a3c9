//! # Stage: Assignment & Completion Engine
//!
//! ## Responsibility
//! Turns "which alternative should this user see?" and "this user converted"
//! into store and session mutations: robot / ignored-IP bypass, forced
//! overrides, winner precedence, sticky weighted assignment, version
//! invalidation, exactly-once completion, and the store-failover policy.
//!
//! ## Guarantees
//! - Idempotent re-entry: a session holding a current-version assignment gets
//!   it back without any counter moving
//! - Exactly-once completion per session and experiment version
//! - Transactional session updates: the caller's [`SessionRecord`] is only
//!   modified when the whole call succeeds
//! - No in-process locks: all coordination is the store's atomic increment
//!
//! ## NOT Responsible For
//! - Retrying store calls (`StoreUnavailable` fails over or propagates)
//! - Persisting the session record (the caller writes it back)

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::alternative::Alternative;
use crate::classify::{ClientClassifier, RequestContext};
use crate::config::SplitConfig;
use crate::definition::{self, AlternativeDef};
use crate::error::{Result, SplitError};
use crate::experiment::Experiment;
use crate::session::SessionRecord;
use crate::stats::ExperimentReport;
use crate::store::KeyValueStore;

/// Entry point for web layers: one shared engine per process.
#[derive(Clone)]
pub struct SplitEngine {
    store: Arc<dyn KeyValueStore>,
    config: SplitConfig,
    classifier: ClientClassifier,
}

impl fmt::Debug for SplitEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitEngine")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .finish()
    }
}

impl SplitEngine {
    pub fn new(store: Arc<dyn KeyValueStore>, config: SplitConfig) -> Result<Self> {
        let classifier = ClientClassifier::from_config(&config)?;
        Ok(Self {
            store,
            config,
            classifier,
        })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub fn classifier(&self) -> &ClientClassifier {
        &self.classifier
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    /// Choose (or recall) the alternative this session sees for `experiment`.
    pub fn ab_test<I, D>(
        &self,
        session: &mut SessionRecord,
        ctx: &RequestContext,
        experiment: &str,
        alternatives: I,
    ) -> Result<String>
    where
        I: IntoIterator<Item = D>,
        D: Into<AlternativeDef>,
    {
        self.ab_test_with_rng(session, ctx, &mut rand::thread_rng(), experiment, alternatives)
    }

    /// [`SplitEngine::ab_test`] with an explicit randomness source.
    pub fn ab_test_with_rng<R, I, D>(
        &self,
        session: &mut SessionRecord,
        ctx: &RequestContext,
        rng: &mut R,
        experiment: &str,
        alternatives: I,
    ) -> Result<String>
    where
        R: Rng + ?Sized,
        I: IntoIterator<Item = D>,
        D: Into<AlternativeDef>,
    {
        let defs = definition::normalize(alternatives)?;
        let mut draft = session.clone();
        match self.assign(&mut draft, ctx, rng, experiment, &defs) {
            Ok(alternative) => {
                *session = draft;
                Ok(alternative)
            }
            Err(e) if e.is_store_unavailable() && self.config.db_failover => {
                tracing::warn!(
                    target: "splitkit::engine",
                    experiment = %experiment,
                    error = %e,
                    "store unavailable, serving first alternative"
                );
                Ok(defs[0].name.clone())
            }
            Err(e) => Err(e),
        }
    }

    fn assign<R: Rng + ?Sized>(
        &self,
        session: &mut SessionRecord,
        ctx: &RequestContext,
        rng: &mut R,
        name: &str,
        defs: &[AlternativeDef],
    ) -> Result<String> {
        let experiment = Experiment::find_or_create(self.store(), name, defs.iter().cloned())?;
        let control = experiment.control().name().to_string();

        if self.classifier.is_excluded(ctx) {
            tracing::debug!(target: "splitkit::engine", experiment = %name, "excluded client, serving control");
            return Ok(control);
        }

        if let Some(forced) = ctx.override_for(name) {
            if experiment.has_alternative(forced) {
                tracing::debug!(
                    target: "splitkit::engine",
                    experiment = %name,
                    alternative = %forced,
                    "forced alternative"
                );
                return Ok(forced.to_string());
            }
        }

        let version = experiment.version()?;
        let key = crate::session::versioned_key(name, version);
        let pruned = session.prune_stale(name, &key);
        if pruned > 0 {
            tracing::debug!(
                target: "splitkit::engine",
                experiment = %name,
                version,
                pruned,
                "dropped stale assignments"
            );
        }

        if let Some(existing) = session.get(&key) {
            if !experiment.has_alternative(existing) {
                // An alternative that no longer exists in this version; reassign.
                session.remove(&key);
            }
        }
        let cached = session.get(&key).map(str::to_string);

        if cached.is_none() && !self.config.allow_multiple_experiments {
            self.prune_other_experiments(session, name)?;
            if session.in_other_experiment(name) {
                tracing::debug!(
                    target: "splitkit::engine",
                    experiment = %name,
                    "session already in another experiment, serving control"
                );
                return Ok(control);
            }
        }

        if let Some(winner) = experiment.winner()? {
            // Count the winner once, for sessions that never saw this version.
            if cached.is_none() {
                Alternative::new(self.store(), name, winner.as_str()).increment_participation()?;
            }
            session.assign(&key, &winner);
            return Ok(winner);
        }

        if let Some(existing) = cached {
            return Ok(existing);
        }

        let chosen = experiment.pick(rng);
        chosen.increment_participation()?;
        session.assign(&key, chosen.name());
        tracing::debug!(
            target: "splitkit::engine",
            experiment = %name,
            alternative = %chosen.name(),
            version,
            "assigned"
        );
        Ok(chosen.name().to_string())
    }

    /// Drop session keys of other experiments that were deleted or have
    /// moved to a newer version, so they no longer hold the session.
    fn prune_other_experiments(&self, session: &mut SessionRecord, current: &str) -> Result<()> {
        for other in session.experiments() {
            if other == current {
                continue;
            }
            let dropped = match Experiment::find(self.store(), &other)? {
                Some(exp) => session.prune_stale(&other, &exp.key()?),
                None => session.remove_experiment(&other),
            };
            if dropped > 0 {
                tracing::debug!(
                    target: "splitkit::engine",
                    experiment = %other,
                    dropped,
                    "dropped assignments of retired experiment"
                );
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Record a conversion for the session's current assignment.
    ///
    /// With `reset` the assignment is dropped afterwards so the session may
    /// be assigned again; without it the assignment stays and a finished
    /// marker stops repeat calls from counting twice.
    pub fn finished(
        &self,
        session: &mut SessionRecord,
        ctx: &RequestContext,
        experiment: &str,
        reset: bool,
    ) -> Result<()> {
        if !session.has_experiment(experiment) || self.classifier.is_excluded(ctx) {
            return Ok(());
        }
        let mut draft = session.clone();
        match self.complete(&mut draft, experiment, reset) {
            Ok(()) => {
                *session = draft;
                Ok(())
            }
            Err(e) if e.is_store_unavailable() && self.config.db_failover => {
                tracing::warn!(
                    target: "splitkit::engine",
                    experiment = %experiment,
                    error = %e,
                    "store unavailable, completion dropped"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn complete(&self, session: &mut SessionRecord, name: &str, reset: bool) -> Result<()> {
        let experiment = match Experiment::find(self.store(), name)? {
            Some(e) => e,
            None => return Ok(()),
        };
        let key = experiment.key()?;
        session.prune_stale(name, &key);

        let alternative = match session.get(&key) {
            Some(a) => a.to_string(),
            None => return Ok(()),
        };

        if session.is_finished(&key) {
            tracing::debug!(target: "splitkit::engine", experiment = %name, "already finished");
        } else {
            Alternative::new(self.store(), name, alternative.as_str()).increment_completion()?;
            tracing::debug!(
                target: "splitkit::engine",
                experiment = %name,
                alternative = %alternative,
                "completed"
            );
        }

        if reset {
            session.remove(&key);
        } else {
            session.mark_finished(&key);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    pub fn experiment(&self, name: &str) -> Result<Option<Experiment>> {
        Experiment::find(self.store(), name)
    }

    pub fn experiments(&self) -> Result<Vec<Experiment>> {
        Experiment::all(self.store())
    }

    /// Report for a saved experiment.
    pub fn report(&self, name: &str) -> Result<ExperimentReport> {
        let experiment = self.experiment(name)?.ok_or_else(|| {
            SplitError::InvalidDefinition(format!("no experiment named '{name}'"))
        })?;
        ExperimentReport::build(&experiment)
    }
}
