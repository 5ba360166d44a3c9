//! Alternative definitions and weighted selection.
//!
//! Callers may describe alternatives as bare names (implicit weight 1) or as
//! `(name, weight)` pairs, freely mixed. Everything is normalised into
//! [`AlternativeDef`] at the API boundary so the selection algorithm only
//! ever sees a uniform list of weighted names.

use std::collections::HashSet;

use crate::error::{Result, SplitError};
use crate::store::VERSION_SUFFIX;

/// One alternative together with its relative weight.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternativeDef {
    pub name: String,
    pub weight: f64,
}

impl AlternativeDef {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

impl From<&str> for AlternativeDef {
    fn from(name: &str) -> Self {
        Self::new(name, 1.0)
    }
}

impl From<String> for AlternativeDef {
    fn from(name: String) -> Self {
        Self::new(name, 1.0)
    }
}

impl From<(&str, f64)> for AlternativeDef {
    fn from((name, weight): (&str, f64)) -> Self {
        Self::new(name, weight)
    }
}

impl From<(String, f64)> for AlternativeDef {
    fn from((name, weight): (String, f64)) -> Self {
        Self::new(name, weight)
    }
}

/// Convert any mix of names / pairs into a validated definition list.
pub fn normalize<I, D>(defs: I) -> Result<Vec<AlternativeDef>>
where
    I: IntoIterator<Item = D>,
    D: Into<AlternativeDef>,
{
    let defs: Vec<AlternativeDef> = defs.into_iter().map(Into::into).collect();
    validate(&defs)?;
    Ok(defs)
}

/// Check the structural rules every experiment definition must satisfy.
pub fn validate(defs: &[AlternativeDef]) -> Result<()> {
    if defs.len() < 2 {
        return Err(SplitError::InvalidDefinition(format!(
            "at least 2 alternatives are required, got {}",
            defs.len()
        )));
    }
    let mut seen = HashSet::new();
    for def in defs {
        if def.name.is_empty() {
            return Err(SplitError::InvalidDefinition(
                "alternative names must not be empty".into(),
            ));
        }
        // `<experiment>:version` holds the version counter.
        if def.name == VERSION_SUFFIX {
            return Err(SplitError::InvalidDefinition(format!(
                "'{VERSION_SUFFIX}' is reserved and cannot name an alternative"
            )));
        }
        if !seen.insert(def.name.as_str()) {
            return Err(SplitError::InvalidDefinition(format!(
                "duplicate alternative '{}'",
                def.name
            )));
        }
        if !def.weight.is_finite() || def.weight < 0.0 {
            return Err(SplitError::InvalidDefinition(format!(
                "alternative '{}' has invalid weight {}",
                def.name, def.weight
            )));
        }
    }
    if defs.iter().map(|d| d.weight).sum::<f64>() <= 0.0 {
        return Err(SplitError::InvalidDefinition(
            "alternative weights must not all be zero".into(),
        ));
    }
    Ok(())
}

/// Names in declaration order.
pub fn names(defs: &[AlternativeDef]) -> Vec<String> {
    defs.iter().map(|d| d.name.clone()).collect()
}

/// Pick an alternative by cumulative weight.
///
/// `uniform_sample` must lie in `[0, 1)`. Weights are relative and are
/// normalised by their sum; the first alternative whose half-open cumulative
/// range contains the sample wins. Returns the index into `defs`.
pub fn pick_weighted(defs: &[AlternativeDef], uniform_sample: f64) -> usize {
    let total: f64 = defs.iter().map(|d| d.weight).sum();
    if defs.is_empty() || total <= 0.0 {
        return 0;
    }
    let threshold = uniform_sample * total;
    let mut cumulative = 0.0;
    for (i, def) in defs.iter().enumerate() {
        cumulative += def.weight;
        if threshold < cumulative {
            return i;
        }
    }
    // Rounding can leave the sample just past the last boundary; fall back to
    // the last alternative that can actually be chosen.
    defs.iter().rposition(|d| d.weight > 0.0).unwrap_or(0)
}
