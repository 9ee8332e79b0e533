//! # Analysis Orchestrator
//! Runs one record through extraction → {anomaly, classifier} → similarity → synthesis,
//! and folds batches into a summary.
//!
//! Per-record DataErrors become failed results (`analysis_failed = true`) so a batch
//! never aborts on one bad row. Any other error aborts the call.

use std::collections::BTreeMap;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::decision::{Reason, SolutionCandidate, SolutionSource, Urgency};
use crate::decompose::{decompose, FieldDecomposition};
use crate::error::{EngineError, Result};
use crate::features::{extract_record, MissingFields};
use crate::case_stats::RootCauseCandidate;
use crate::recommend::{synthesize, Evidence, Knowledge, SimilarCase};
use crate::records::DifferenceRecord;
use crate::snapshot::ModelSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarCaseRef {
    pub case_id: String,
    pub similarity: f64,
}

/// Outcome for one record. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub record_id: String,
    pub is_anomaly: bool,
    /// Lower = more anomalous.
    pub anomaly_score: f64,
    /// 0..10 display scale.
    pub anomaly_severity: f64,
    pub predicted_type: String,
    /// Predicted type when confident, otherwise "Undetermined".
    pub declared_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    pub confidence: f64,
    pub top_similar_cases: Vec<SimilarCaseRef>,
    pub recommended_resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_source: Option<SolutionSource>,
    /// Minutes.
    pub estimated_resolution_time: f64,
    pub urgency: Urgency,
    pub root_cause_candidates: Vec<RootCauseCandidate>,
    pub alternative_solutions: Vec<SolutionCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<FieldDecomposition>,
    pub missing: MissingFields,
    pub reasons: Vec<Reason>,
    pub analysis_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl AnalysisResult {
    fn failed(record_id: &str, reason: String) -> Self {
        Self {
            record_id: record_id.to_string(),
            is_anomaly: false,
            anomaly_score: 0.0,
            anomaly_severity: 0.0,
            predicted_type: String::new(),
            declared_type: String::new(),
            type_hint: None,
            confidence: 0.0,
            top_similar_cases: Vec::new(),
            recommended_resolution: String::new(),
            resolution_source: None,
            estimated_resolution_time: 0.0,
            urgency: Urgency::Low,
            root_cause_candidates: Vec::new(),
            alternative_solutions: Vec::new(),
            decomposition: None,
            missing: MissingFields::default(),
            reasons: Vec::new(),
            analysis_failed: true,
            failure_reason: Some(reason),
        }
    }
}

/// Aggregates over a batch. Confidence/time means and histograms cover analysed records only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub count: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub anomaly_count: usize,
    pub mean_confidence: f64,
    pub high_confidence_count: usize,
    pub mean_estimated_resolution_time: f64,
    pub type_histogram: BTreeMap<String, usize>,
    pub urgency_histogram: BTreeMap<Urgency, usize>,
}

impl BatchSummary {
    pub fn from_results(results: &[AnalysisResult], high_confidence_mark: f64) -> Self {
        let ok: Vec<&AnalysisResult> = results.iter().filter(|r| !r.analysis_failed).collect();
        let analyzed = ok.len();
        let mean = |f: fn(&AnalysisResult) -> f64| {
            if analyzed == 0 {
                0.0
            } else {
                ok.iter().map(|r| f(r)).sum::<f64>() / analyzed as f64
            }
        };

        let mut type_histogram = BTreeMap::new();
        let mut urgency_histogram: BTreeMap<Urgency, usize> =
            Urgency::ALL.iter().map(|u| (*u, 0)).collect();
        for r in &ok {
            *type_histogram.entry(r.predicted_type.clone()).or_insert(0) += 1;
            *urgency_histogram.entry(r.urgency).or_insert(0) += 1;
        }

        Self {
            count: results.len(),
            analyzed,
            failed: results.len() - analyzed,
            anomaly_count: ok.iter().filter(|r| r.is_anomaly).count(),
            mean_confidence: mean(|r| r.confidence),
            high_confidence_count: ok
                .iter()
                .filter(|r| r.confidence > high_confidence_mark)
                .count(),
            mean_estimated_resolution_time: mean(|r| r.estimated_resolution_time),
            type_histogram,
            urgency_histogram,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchAnalysis {
    pub results: Vec<AnalysisResult>,
    pub summary: BatchSummary,
}

/// Analyse one record against a snapshot.
pub fn analyze_one(snapshot: &ModelSnapshot, record: &DifferenceRecord) -> Result<AnalysisResult> {
    match analyze_inner(snapshot, record) {
        Ok(r) => Ok(r),
        Err(EngineError::Data { context, message }) => {
            let reason = format!("{context}: {message}");
            warn!(target: "engine", record = %record.id, %reason, "analysis failed");
            Ok(AnalysisResult::failed(&record.id, reason))
        }
        Err(e) => Err(e),
    }
}

/// Order-preserving; records are independent so they may run in parallel.
pub fn analyze_batch(snapshot: &ModelSnapshot, records: &[DifferenceRecord]) -> Result<BatchAnalysis> {
    let started = Instant::now();
    let results: Vec<AnalysisResult> = if snapshot.config().batch.parallel {
        records
            .par_iter()
            .map(|r| analyze_one(snapshot, r))
            .collect::<Result<_>>()?
    } else {
        records
            .iter()
            .map(|r| analyze_one(snapshot, r))
            .collect::<Result<_>>()?
    };
    let summary = BatchSummary::from_results(
        &results,
        snapshot.config().recommendation.high_confidence_mark,
    );
    info!(
        target: "engine",
        count = summary.count,
        anomalies = summary.anomaly_count,
        failed = summary.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch analysed"
    );
    Ok(BatchAnalysis { results, summary })
}

fn analyze_inner(snapshot: &ModelSnapshot, record: &DifferenceRecord) -> Result<AnalysisResult> {
    let features = extract_record(record, snapshot.encoder())?;
    let anomaly = snapshot.anomaly().score(&features.anomaly_input())?;
    let prediction = snapshot.classifier().predict(&features.classifier_input())?;

    let pct_abs = features.numeric[1];
    let query = snapshot.query_text(&record.asset_class, &prediction.label, pct_abs);
    let matches = snapshot.index().search(&query);
    let similar: Vec<SimilarCase<'_>> = matches
        .iter()
        .filter_map(|m| {
            snapshot.cases().get(m.position).map(|case| SimilarCase {
                case,
                similarity: m.similarity,
            })
        })
        .collect();

    let decomposition = decompose(record);
    let config = snapshot.config();
    let evidence = Evidence {
        asset_class: &record.asset_class,
        amount_abs: features.numeric[0],
        pct_abs,
        anomaly,
        prediction: &prediction,
        similar: &similar,
        decomposition: decomposition.as_ref(),
    };
    let knowledge = Knowledge {
        stats: snapshot.stats(),
        rules: snapshot.rules(),
        recommendation: &config.recommendation,
        urgency: &config.urgency,
    };
    let rec = synthesize(&evidence, &knowledge);

    Ok(AnalysisResult {
        record_id: record.id.clone(),
        is_anomaly: anomaly.is_anomaly,
        anomaly_score: anomaly.score,
        anomaly_severity: anomaly.severity(),
        predicted_type: prediction.label.clone(),
        declared_type: rec.declared_type,
        type_hint: rec.type_hint,
        confidence: prediction.confidence,
        top_similar_cases: matches
            .into_iter()
            .map(|m| SimilarCaseRef {
                case_id: m.case_id,
                similarity: m.similarity,
            })
            .collect(),
        recommended_resolution: rec.recommended_resolution,
        resolution_source: Some(rec.resolution_source),
        estimated_resolution_time: rec.estimated_resolution_time,
        urgency: rec.urgency,
        root_cause_candidates: rec.root_cause_candidates,
        alternative_solutions: rec.alternative_solutions,
        decomposition,
        missing: features.missing,
        reasons: rec.reasons,
        analysis_failed: false,
        failure_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str, ty: &str, confidence: f64, urgency: Urgency, anomaly: bool) -> AnalysisResult {
        let mut r = AnalysisResult::failed(id, String::new());
        r.analysis_failed = false;
        r.failure_reason = None;
        r.predicted_type = ty.into();
        r.confidence = confidence;
        r.urgency = urgency;
        r.is_anomaly = anomaly;
        r.estimated_resolution_time = 30.0;
        r
    }

    #[test]
    fn summary_counts_and_histograms() {
        let results = vec![
            ok("A", "Pricing Error", 0.9, Urgency::Critical, true),
            ok("B", "Pricing Error", 0.5, Urgency::Low, false),
            ok("C", "Fee Mismatch", 0.8, Urgency::Medium, false),
            AnalysisResult::failed("D", "bad value".into()),
        ];
        let s = BatchSummary::from_results(&results, 0.7);
        assert_eq!(s.count, 4);
        assert_eq!(s.analyzed, 3);
        assert_eq!(s.failed, 1);
        assert_eq!(s.anomaly_count, 1);
        assert_eq!(s.high_confidence_count, 2);
        assert!((s.mean_confidence - 2.2 / 3.0).abs() < 1e-12);
        assert_eq!(s.type_histogram["Pricing Error"], 2);
        assert_eq!(s.urgency_histogram[&Urgency::High], 0);
        assert_eq!(s.urgency_histogram[&Urgency::Critical], 1);
        assert_eq!(s.mean_estimated_resolution_time, 30.0);
    }

    #[test]
    fn empty_batch_summary_is_zeroed() {
        let s = BatchSummary::from_results(&[], 0.7);
        assert_eq!(s.count, 0);
        assert_eq!(s.mean_confidence, 0.0);
        assert_eq!(s.urgency_histogram.len(), 4);
    }
}
