//! Significance statistics against stored counters.

use std::sync::Arc;

use rstest::rstest;
use splitkit::stats::{self, Counts};
use splitkit::store::{alternative_key, FIELD_COMPLETED, FIELD_PARTICIPANTS};
use splitkit::{Experiment, ExperimentReport, KeyValueStore, MemoryStore};

/// Experiment whose counters are written straight into the store.
fn seeded_experiment(rows: &[(&str, u64, u64)]) -> Experiment {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let names: Vec<&str> = rows.iter().map(|r| r.0).collect();
    let exp = Experiment::find_or_create(store.clone(), "link_color", names).unwrap();
    for (name, participants, completed) in rows {
        let key = alternative_key("link_color", name);
        store
            .hash_set(&key, FIELD_PARTICIPANTS, &participants.to_string())
            .unwrap();
        store
            .hash_set(&key, FIELD_COMPLETED, &completed.to_string())
            .unwrap();
    }
    exp
}

fn fixture() -> Experiment {
    seeded_experiment(&[
        ("control", 182, 35),
        ("red", 180, 45),
        ("green", 189, 28),
        ("blue", 188, 61),
    ])
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[rstest]
#[case("red", 1.33)]
#[case("green", -1.13)]
#[case("blue", 2.94)]
fn test_z_score_known_fixture(#[case] name: &str, #[case] expected: f64) {
    let exp = fixture();
    let alt = exp
        .alternatives()
        .into_iter()
        .find(|a| a.name() == name)
        .unwrap();
    assert_eq!(round2(alt.z_score().unwrap().unwrap()), expected);
}

#[test]
fn test_control_z_score_is_none() {
    let exp = fixture();
    assert_eq!(exp.control().z_score().unwrap(), None);
}

#[test]
fn test_report_matches_alternative_scores() {
    let report = ExperimentReport::build(&fixture()).unwrap();
    let z: Vec<Option<f64>> = report
        .alternatives
        .iter()
        .map(|a| a.z_score.map(round2))
        .collect();
    assert_eq!(z, vec![None, Some(1.33), Some(-1.13), Some(2.94)]);
    assert_eq!(report.alternatives[3].confidence, "99% confidence");
    assert_eq!(report.alternatives[1].confidence, "no confidence");
    assert_eq!(report.total_participants(), 739);
    assert_eq!(report.total_completed(), 169);
}

#[test]
fn test_report_serialises_without_control_z_score() {
    let report = ExperimentReport::build(&fixture()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["alternatives"][0].get("z_score").is_none());
    assert_eq!(json["alternatives"][0]["confidence"], "N/A");
}

#[rstest]
#[case(0, 0, 0.0)]
#[case(4, 10, 0.4)]
#[case(10, 10, 1.0)]
fn test_conversion_rate_boundaries(#[case] completed: u64, #[case] participants: u64, #[case] expected: f64) {
    assert_eq!(stats::conversion_rate(completed, participants), expected);
}

#[test]
fn test_conversion_rate_from_store() {
    let exp = seeded_experiment(&[("a", 0, 0), ("b", 10, 4)]);
    let alts = exp.alternatives();
    assert_eq!(alts[0].conversion_rate().unwrap(), 0.0);
    assert_eq!(alts[1].conversion_rate().unwrap(), 0.4);
}

#[test]
fn test_z_score_without_participants_is_none() {
    let exp = seeded_experiment(&[("a", 0, 0), ("b", 10, 4)]);
    assert_eq!(exp.alternatives()[1].z_score().unwrap(), None);
}

#[test]
fn test_pooled_z_score_on_fixture() {
    let control = Counts::new(35, 182);
    assert_eq!(round2(stats::pooled_z_score(Counts::new(45, 180), control).unwrap()), 1.32);
    assert_eq!(round2(stats::pooled_z_score(Counts::new(61, 188), control).unwrap()), 2.90);
}

#[rstest]
#[case(0.0, 1.0)]
#[case(1.96, 0.05)]
#[case(2.58, 0.0099)]
fn test_p_value(#[case] z: f64, #[case] expected: f64) {
    assert!((stats::p_value(z) - expected).abs() < 5e-4);
}

#[test]
fn test_alternative_z_score_is_unpooled() {
    let exp = fixture();
    let control = exp.control().counts().unwrap();
    let blue = exp.alternatives().into_iter().find(|a| a.name() == "blue").unwrap();
    let counts = blue.counts().unwrap();
    let z = blue.z_score().unwrap().unwrap();
    assert_eq!(Some(z), stats::z_score(counts, control));
    assert_ne!(round2(z), round2(stats::pooled_z_score(counts, control).unwrap()));
}
