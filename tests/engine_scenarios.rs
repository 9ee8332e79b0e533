// tests/engine_scenarios.rs
//
// End-to-end engine behaviour over the bundled sample data, no HTTP.

use std::path::PathBuf;

use chrono::NaiveDate;
use valuation_triage::dataset;
use valuation_triage::similarity::SimilarityIndex;
use valuation_triage::config::SimilarityConfig;
use valuation_triage::{
    DifferenceRecord, EngineConfig, EngineError, EngineHandle, ModelSnapshot, Status, TrainingSet,
    Urgency,
};

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data").join(name)
}

fn training_set() -> TrainingSet {
    dataset::load_training_set(&data("historical_cases.csv"), &data("valuation_rules.csv"))
        .expect("bundled training data loads")
}

fn snapshot_with(config: &EngineConfig) -> ModelSnapshot {
    ModelSnapshot::train(&training_set(), config).expect("train")
}

fn samples() -> Vec<DifferenceRecord> {
    dataset::load_differences(&data("sample_differences.csv")).expect("sample differences")
}

#[test]
fn batch_is_order_preserving_and_complete() {
    let snap = snapshot_with(&EngineConfig::default());
    let records = samples();
    let batch = snap.analyze_batch(&records).unwrap();

    let ids: Vec<_> = batch.results.iter().map(|r| r.record_id.as_str()).collect();
    let expected: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, expected);
    assert_eq!(batch.summary.count, records.len());
    assert_eq!(batch.summary.failed, 0);

    let labels = snap.info().labels;
    for r in &batch.results {
        assert!(labels.contains(&r.predicted_type), "{} -> {}", r.record_id, r.predicted_type);
        assert!((0.0..=1.0).contains(&r.confidence));
        assert!(r.top_similar_cases.len() <= 5);
        assert!(r
            .top_similar_cases
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));
        assert!(r.estimated_resolution_time >= 0.0);
    }
}

#[test]
fn unseen_asset_class_still_gets_a_label() {
    let snap = snapshot_with(&EngineConfig::default());
    let r = DifferenceRecord::new(
        "VDX",
        NaiveDate::from_ymd_opt(2024, 10, 2).unwrap(),
        "Crypto",
        80_000.0,
        80_300.0,
    );
    assert!(!snap.encoder().is_known("Crypto"));
    let out = snap.analyze_one(&r).unwrap();
    assert!(!out.analysis_failed);
    assert!(!out.predicted_type.is_empty());
    assert!((0.0..=1.0).contains(&out.confidence));
}

#[test]
fn large_percentage_is_at_least_high() {
    let snap = snapshot_with(&EngineConfig::default());
    let r = DifferenceRecord::new(
        "VD002",
        NaiveDate::from_ymd_opt(2024, 10, 2).unwrap(),
        "Equity",
        10_000.0,
        15_000.0,
    );
    let out = snap.analyze_one(&r).unwrap();
    assert!(out.urgency >= Urgency::High);
    if out.is_anomaly {
        assert_eq!(out.urgency, Urgency::Critical);
    }
}

#[test]
fn parallel_and_sequential_batches_agree() {
    let mut seq_cfg = EngineConfig::default();
    seq_cfg.batch.parallel = false;
    let records = samples();

    let par = snapshot_with(&EngineConfig::default())
        .analyze_batch(&records)
        .unwrap();
    let seq = snapshot_with(&seq_cfg).analyze_batch(&records).unwrap();
    assert_eq!(par, seq);
}

#[test]
fn malformed_record_fails_alone() {
    let snap = snapshot_with(&EngineConfig::default());
    let mut records = samples();
    let mut bad = records[0].clone();
    bad.id = "BROKEN".into();
    bad.internal_value = Some(f64::INFINITY);
    bad.difference = None;
    bad.difference_pct = None;
    records.insert(1, bad);

    let batch = snap.analyze_batch(&records).unwrap();
    assert_eq!(batch.results.len(), records.len());
    let broken = &batch.results[1];
    assert_eq!(broken.record_id, "BROKEN");
    assert!(broken.analysis_failed);
    assert!(broken.failure_reason.is_some());
    assert_eq!(batch.summary.failed, 1);
    assert!(!batch.results[0].analysis_failed);
}

#[test]
fn inconsistent_csv_row_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.csv");
    std::fs::write(
        &path,
        "id,date,asset_class,custodian_value,internal_value,difference,difference_pct,status\n\
         VD1,2024-10-02,Bond,1000000,1001200,1200,0.12,open\n\
         VD2,2024-10-02,Cash,0,150,,,open\n\
         VD3,2024-10-02,Equity,10000,10010.4,10.4,0.095,open\n\
         VD4,2024-10-02,Equity,10000,15000,5000,50,open\n",
    )
    .unwrap();

    let records = dataset::load_differences(&path).expect("rows parse");
    assert_eq!(records.len(), 4);

    let batch = snapshot_with(&EngineConfig::default())
        .analyze_batch(&records)
        .unwrap();
    assert_eq!(batch.results.len(), 4);
    assert_eq!(batch.summary.failed, 2);
    let failed: Vec<_> = batch
        .results
        .iter()
        .filter(|r| r.analysis_failed)
        .map(|r| r.record_id.as_str())
        .collect();
    assert_eq!(failed, ["VD2", "VD3"]);
    let reason = batch.results[1].failure_reason.as_deref().unwrap_or_default();
    assert!(reason.contains("zero custodian_value"), "{reason}");
}

#[test]
fn builder_fields_do_not_change_the_analysis() {
    let snap = snapshot_with(&EngineConfig::default());
    let date = NaiveDate::from_ymd_opt(2024, 10, 2).unwrap();
    let bare = DifferenceRecord::new("VD-B", date, "Bond", 1_000_000.0, 1_001_200.0);
    let full = bare
        .clone()
        .with_fund("HKGBF", "HK Global Bond Fund")
        .with_security("US91282C1968", "UST 4.25% 2034")
        .with_status(Status::Analyzing);
    assert_eq!(full.fund_code, "HKGBF");
    assert_eq!(full.security_name, "UST 4.25% 2034");
    assert_eq!(full.status, Status::Analyzing);
    assert_eq!(snap.analyze_one(&bare).unwrap(), snap.analyze_one(&full).unwrap());
}

#[test]
fn missing_values_are_flagged_not_failed() {
    let snap = snapshot_with(&EngineConfig::default());
    let mut r = DifferenceRecord::new(
        "VD-MISSING",
        NaiveDate::from_ymd_opt(2024, 10, 2).unwrap(),
        "Bond",
        1.0,
        1.0,
    );
    r.custodian_value = None;
    r.internal_value = None;
    r.difference = None;
    r.difference_pct = None;
    let out = snap.analyze_one(&r).unwrap();
    assert!(!out.analysis_failed);
    assert!(out.missing.difference && out.missing.difference_pct);
}

#[test]
fn decomposition_present_when_breakdown_supplied() {
    let snap = snapshot_with(&EngineConfig::default());
    let records = samples();
    let out = snap.analyze_one(&records[0]).unwrap();
    let d = out.decomposition.expect("VD001 carries breakdown columns");
    assert!(d.has_price_diff);
    assert!(out.alternative_solutions.len() <= 5);
    assert!(snap.analyze_one(&records[3]).unwrap().decomposition.is_none());
}

#[test]
fn training_is_deterministic() {
    let records = samples();
    let a = snapshot_with(&EngineConfig::default())
        .analyze_batch(&records)
        .unwrap();
    let b = snapshot_with(&EngineConfig::default())
        .analyze_batch(&records)
        .unwrap();
    assert_eq!(a.results, b.results);
}

#[test]
fn untrained_handle_surfaces_model_not_trained() {
    let handle = EngineHandle::new_untrained();
    let err = handle.analyze_batch(&samples()).unwrap_err();
    assert!(matches!(err, EngineError::ModelNotTrained(_)));
}

#[test]
fn empty_corpus_is_valid_for_search_but_not_for_training() {
    let index = SimilarityIndex::fit(SimilarityConfig::default(), Vec::new()).unwrap();
    assert!(index.search("Bond Pricing Error 0.12").is_empty());

    let err = ModelSnapshot::train(&TrainingSet::default(), &EngineConfig::default()).unwrap_err();
    assert!(matches!(err, EngineError::Data { .. }));
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let mut cfg = EngineConfig::default();
    cfg.similarity.top_k = 0;
    let err = ModelSnapshot::train(&training_set(), &cfg).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}
