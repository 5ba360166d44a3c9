//! Crate-level error type.
//!
//! Every fallible operation in the crate returns [`Result`]. Only
//! [`SplitError::StoreUnavailable`] is ever recovered locally (by the engine's
//! failover branch); all other variants always reach the caller.

use thiserror::Error;

/// Errors produced by the split-testing engine and its store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    /// Experiment definition rejected: fewer than two alternatives, a
    /// duplicate or empty name, or an unusable weight.
    #[error("invalid experiment definition: {0}")]
    InvalidDefinition(String),

    /// The backing key-value store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Attempt to crown a winner that is not one of the experiment's alternatives.
    #[error("'{alternative}' is not an alternative of experiment '{experiment}'")]
    UnknownWinner {
        experiment: String,
        alternative: String,
    },

    /// A persisted value could not be interpreted.
    #[error("corrupt value at '{key}': {detail}")]
    Corrupt { key: String, detail: String },

    /// Configuration could not be read, parsed or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SplitError {
    /// `true` for connectivity failures, the only class the failover policy absorbs.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, SplitError::StoreUnavailable(_))
    }

    pub(crate) fn corrupt(key: &str, detail: impl Into<String>) -> Self {
        SplitError::Corrupt {
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, SplitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_is_detected() {
        assert!(SplitError::StoreUnavailable("down".into()).is_store_unavailable());
        assert!(!SplitError::InvalidDefinition("x".into()).is_store_unavailable());
        assert!(!SplitError::corrupt("k", "nan").is_store_unavailable());
    }

    #[test]
    fn test_unknown_winner_display_names_both_sides() {
        let err = SplitError::UnknownWinner {
            experiment: "link_color".into(),
            alternative: "purple".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("link_color"));
        assert!(msg.contains("purple"));
    }

    #[test]
    fn test_corrupt_display_includes_key() {
        let err = SplitError::corrupt("exp:red", "not an integer");
        assert_eq!(err.to_string(), "corrupt value at 'exp:red': not an integer");
    }
}
