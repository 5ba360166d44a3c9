//! # splitkit
//!
//! A store-backed split-testing (A/B testing) engine.
//!
//! Experiments are named lists of alternatives whose control is the first
//! entry. The [`SplitEngine`] hands each user session a sticky, weighted
//! random alternative, counts participation and completion exactly once per
//! session and experiment version, honours a forced winner, and keeps robots
//! and ignored addresses out of the numbers. [`stats`] turns the counters
//! into conversion rates and z-scores against the control.
//!
//! All durable state lives behind [`KeyValueStore`]: [`MemoryStore`] for
//! tests and single-process use, and a Redis backend behind the
//! `redis-backing` feature.
//!
//! ```
//! use std::sync::Arc;
//! use splitkit::{MemoryStore, RequestContext, SessionRecord, SplitConfig, SplitEngine};
//!
//! let engine = SplitEngine::new(Arc::new(MemoryStore::new()), SplitConfig::default()).unwrap();
//! let mut session = SessionRecord::new();
//! let ctx = RequestContext::new().with_user_agent("Mozilla/5.0");
//!
//! let color = engine.ab_test(&mut session, &ctx, "link_color", ["blue", "red"]).unwrap();
//! assert!(color == "blue" || color == "red");
//! engine.finished(&mut session, &ctx, "link_color", true).unwrap();
//! ```

pub mod alternative;
pub mod classify;
pub mod cli;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod session;
pub mod stats;
pub mod store;

pub use alternative::Alternative;
pub use classify::{ClientClassifier, RequestContext};
pub use config::SplitConfig;
pub use definition::AlternativeDef;
pub use engine::SplitEngine;
pub use error::{Result, SplitError};
pub use experiment::Experiment;
pub use session::{SessionRecord, SessionStore};
pub use stats::{AlternativeReport, ExperimentReport};
pub use store::{KeyValueStore, MemoryStore};

#[cfg(feature = "redis-backing")]
pub use store::RedisStore;
