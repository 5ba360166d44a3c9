//! # Stage: Significance Statistics
//!
//! ## Responsibility
//! Pure read-side statistics over alternative counters: conversion rate,
//! two-proportion z-scores against the control, two-tailed p-values and a
//! coarse confidence label, plus a serialisable per-experiment report.
//!
//! ## Guarantees
//! - Side-effect free: nothing here writes to the store
//! - Non-panicking: zero participants and zero standard error yield
//!   `0.0` / `None` rather than NaN or a panic
//!
//! ## NOT Responsible For
//! - Deciding a winner automatically (winners are set explicitly)
//! - Sequential-testing corrections

use serde::Serialize;

use crate::error::Result;
use crate::experiment::Experiment;

/// Completed / participant counts for one alternative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub completed: u64,
    pub participants: u64,
}

impl Counts {
    pub fn new(completed: u64, participants: u64) -> Self {
        Self {
            completed,
            participants,
        }
    }

    pub fn conversion_rate(&self) -> f64 {
        conversion_rate(self.completed, self.participants)
    }
}

/// `completed / participants`, or `0.0` when nobody participated.
pub fn conversion_rate(completed: u64, participants: u64) -> f64 {
    if participants == 0 {
        0.0
    } else {
        completed as f64 / participants as f64
    }
}

/// z-score of `alternative` against `control`.
///
/// The standard error is built from each side's own variance,
/// `sqrt(Pc(1-Pc)/Nc + Pe(1-Pe)/Ne)`, which is what the dashboard figures
/// are calibrated against. Returns `None` when either side has no
/// participants or the standard error is zero.
pub fn z_score(alternative: Counts, control: Counts) -> Option<f64> {
    if alternative.participants == 0 || control.participants == 0 {
        return None;
    }
    let (pe, ne) = (alternative.conversion_rate(), alternative.participants as f64);
    let (pc, nc) = (control.conversion_rate(), control.participants as f64);
    let se = (pc * (1.0 - pc) / nc + pe * (1.0 - pe) / ne).sqrt();
    if se == 0.0 || !se.is_finite() {
        return None;
    }
    Some((pe - pc) / se)
}

/// z-score using the pooled proportion `P = (Kc + Ke) / (Nc + Ne)`.
pub fn pooled_z_score(alternative: Counts, control: Counts) -> Option<f64> {
    if alternative.participants == 0 || control.participants == 0 {
        return None;
    }
    let (pe, ne) = (alternative.conversion_rate(), alternative.participants as f64);
    let (pc, nc) = (control.conversion_rate(), control.participants as f64);
    let pooled = (control.completed + alternative.completed) as f64 / (nc + ne);
    let se = (pooled * (1.0 - pooled) * (1.0 / nc + 1.0 / ne)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return None;
    }
    Some((pe - pc) / se)
}

/// Two-tailed p-value for a z-score under the standard normal.
pub fn p_value(z: f64) -> f64 {
    (2.0 * standard_normal_upper_tail(z.abs())).min(1.0)
}

/// Human-readable confidence bucket for a z-score.
pub fn confidence_level(z: Option<f64>) -> &'static str {
    let z = match z {
        Some(z) => z.abs(),
        None => return "N/A",
    };
    if z >= 2.58 {
        "99% confidence"
    } else if z >= 1.96 {
        "95% confidence"
    } else if z >= 1.65 {
        "90% confidence"
    } else {
        "no confidence"
    }
}

/// Upper tail probability of the standard normal distribution (Z > x).
/// Abramowitz & Stegun 26.2.17, accurate to ~1e-7.
fn standard_normal_upper_tail(x: f64) -> f64 {
    if x < 0.0 {
        return 1.0 - standard_normal_upper_tail(-x);
    }
    if x > 8.0 {
        return 0.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x);
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let pdf = (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt();
    pdf * poly
}

// ---------------------------------------------------------------------------
// ExperimentReport
// ---------------------------------------------------------------------------

/// Snapshot of one alternative's performance.
#[derive(Debug, Clone, Serialize)]
pub struct AlternativeReport {
    pub name: String,
    pub is_control: bool,
    pub participants: u64,
    pub completed: u64,
    pub conversion_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    pub confidence: &'static str,
}

/// Snapshot of a whole experiment, as shown by `splitctl show`.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub name: String,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<u64>,
    pub alternatives: Vec<AlternativeReport>,
}

impl ExperimentReport {
    /// Read every counter once and derive the statistics from that snapshot.
    pub fn build(experiment: &Experiment) -> Result<Self> {
        let alternatives = experiment.alternatives();
        let mut counts = Vec::with_capacity(alternatives.len());
        for alt in &alternatives {
            counts.push(alt.counts()?);
        }
        let control = counts.first().copied().unwrap_or_default();

        let rows = alternatives
            .iter()
            .zip(counts.iter())
            .enumerate()
            .map(|(i, (alt, c))| {
                let z = if i == 0 { None } else { z_score(*c, control) };
                AlternativeReport {
                    name: alt.name().to_string(),
                    is_control: i == 0,
                    participants: c.participants,
                    completed: c.completed,
                    conversion_rate: c.conversion_rate(),
                    z_score: z,
                    confidence: confidence_level(z),
                }
            })
            .collect();

        Ok(Self {
            name: experiment.name().to_string(),
            version: experiment.version()?,
            winner: experiment.winner()?,
            start_time_ms: experiment.start_time()?,
            alternatives: rows,
        })
    }

    pub fn total_participants(&self) -> u64 {
        self.alternatives.iter().map(|a| a.participants).sum()
    }

    pub fn total_completed(&self) -> u64 {
        self.alternatives.iter().map(|a| a.completed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(completed: u64, participants: u64) -> Counts {
        Counts::new(completed, participants)
    }

    // ===== conversion_rate =====

    #[test]
    fn test_conversion_rate_zero_participants_is_zero() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(5, 0), 0.0);
    }

    #[test]
    fn test_conversion_rate_ratio() {
        assert!((conversion_rate(4, 10) - 0.4).abs() < 1e-12);
    }

    // ===== z_score =====

    #[test]
    fn test_z_score_none_without_participants() {
        assert_eq!(z_score(c(0, 0), c(3, 10)), None);
        assert_eq!(z_score(c(3, 10), c(0, 0)), None);
    }

    #[test]
    fn test_z_score_none_when_se_is_zero() {
        assert_eq!(z_score(c(0, 10), c(0, 20)), None);
        assert_eq!(z_score(c(10, 10), c(20, 20)), None);
        assert_eq!(pooled_z_score(c(0, 10), c(0, 20)), None);
    }

    #[test]
    fn test_z_score_sign_follows_difference() {
        assert!(z_score(c(8, 10), c(2, 10)).unwrap() > 0.0);
        assert!(z_score(c(2, 10), c(8, 10)).unwrap() < 0.0);
    }

    #[test]
    fn test_pooled_z_score_close_to_unpooled_for_similar_sizes() {
        let z = z_score(c(45, 180), c(35, 182)).unwrap();
        let zp = pooled_z_score(c(45, 180), c(35, 182)).unwrap();
        assert!((z - zp).abs() < 0.05);
        assert_eq!(format!("{zp:.2}"), "1.32");
    }

    // ===== p_value / confidence =====

    #[test]
    fn test_p_value_at_zero_is_one() {
        assert!((p_value(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_p_value_at_1_96_is_five_percent() {
        assert!((p_value(1.96) - 0.05).abs() < 1e-3);
        assert!((p_value(-1.96) - 0.05).abs() < 1e-3);
    }

    #[test]
    fn test_confidence_level_na_for_none() {
        assert_eq!(confidence_level(None), "N/A");
    }

    #[test]
    fn test_confidence_level_uses_absolute_value() {
        assert_eq!(confidence_level(Some(-2.6)), "99% confidence");
    }
}
