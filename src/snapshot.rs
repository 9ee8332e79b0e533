//! Immutable trained-model snapshot and the swappable handle the server shares.
//!
//! A [`ModelSnapshot`] bundles everything inference needs (encoder, both models,
//! similarity index, corpus, rules, stats) and is never mutated after training.
//! [`EngineHandle`] holds the current snapshot behind an `RwLock<Option<Arc<_>>>`:
//! readers clone the `Arc` and drop the lock before analysing; retrain builds the new
//! snapshot with no lock held and swaps it in under a short write lock.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::analysis::{self, AnalysisResult, BatchAnalysis};
use crate::anomaly::AnomalyDetector;
use crate::case_stats::CaseStats;
use crate::classifier::RootCauseClassifier;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::features::{extract_case, CategoryEncoder};
use crate::records::{DifferenceRecord, HistoricalCase, TrainingSet, ValuationRule};
use crate::similarity::SimilarityIndex;

const ENGINE: &str = "engine";

#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    config: EngineConfig,
    encoder: CategoryEncoder,
    anomaly: AnomalyDetector,
    classifier: RootCauseClassifier,
    index: SimilarityIndex,
    cases: Vec<HistoricalCase>,
    rules: Vec<ValuationRule>,
    stats: CaseStats,
    trained_at: DateTime<Utc>,
}

/// Public description of a trained snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub cases: usize,
    pub rules: usize,
    pub labels: Vec<String>,
    /// Training cases per difference type.
    pub type_counts: BTreeMap<String, usize>,
    pub asset_classes: Vec<String>,
    pub vocabulary_size: usize,
    pub anomaly_threshold: Option<f64>,
    pub trained_at: DateTime<Utc>,
}

impl ModelSnapshot {
    /// Fit every component on the training set. Empty corpora are rejected.
    pub fn train(set: &TrainingSet, config: &EngineConfig) -> Result<Self> {
        let started = Instant::now();
        config.validate()?;
        set.validate()?;
        if set.cases.is_empty() {
            return Err(EngineError::data(
                "training set",
                "no historical cases to train on",
            ));
        }

        let encoder = CategoryEncoder::fit(set.cases.iter().map(|c| c.asset_class.as_str()));
        let features = set
            .cases
            .iter()
            .map(|c| extract_case(c, &encoder))
            .collect::<Result<Vec<_>>>()?;

        let mut anomaly = AnomalyDetector::new(config.anomaly.clone())?;
        let population: Vec<_> = features.iter().map(|f| f.anomaly_input()).collect();
        anomaly.fit(&population)?;

        let mut classifier = RootCauseClassifier::new(config.classifier.clone())?;
        let x: Vec<_> = features.iter().map(|f| f.classifier_input()).collect();
        let y: Vec<String> = set.cases.iter().map(|c| c.difference_type.clone()).collect();
        classifier.fit(&x, &y)?;

        let index = SimilarityIndex::from_cases(config.similarity.clone(), &set.cases)?;
        let stats = CaseStats::from_cases(&set.cases);

        let snapshot = Self {
            config: config.clone(),
            encoder,
            anomaly,
            classifier,
            index,
            cases: set.cases.clone(),
            rules: set.rules.clone(),
            stats,
            trained_at: Utc::now(),
        };
        info!(
            target: ENGINE,
            cases = snapshot.cases.len(),
            labels = snapshot.classifier.labels().len(),
            vocabulary = snapshot.index.vocabulary_len(),
            threshold = ?snapshot.anomaly.threshold(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model snapshot trained"
        );
        Ok(snapshot)
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            cases: self.cases.len(),
            rules: self.rules.len(),
            labels: self.classifier.labels().to_vec(),
            type_counts: self.stats.type_counts(),
            asset_classes: self.encoder.categories().map(str::to_string).collect(),
            vocabulary_size: self.index.vocabulary_len(),
            anomaly_threshold: self.anomaly.threshold(),
            trained_at: self.trained_at,
        }
    }

    pub fn analyze_one(&self, record: &DifferenceRecord) -> Result<AnalysisResult> {
        analysis::analyze_one(self, record)
    }

    pub fn analyze_batch(&self, records: &[DifferenceRecord]) -> Result<BatchAnalysis> {
        analysis::analyze_batch(self, records)
    }

    /// Similarity query for a record: asset class, predicted type, its most common
    /// root cause and the |pct| summary.
    pub fn query_text(&self, asset_class: &str, predicted_type: &str, pct_abs: f64) -> String {
        let cause = self.stats.top_root_cause(predicted_type).unwrap_or_default();
        format!("{asset_class} {predicted_type} {cause} {pct_abs:.2}")
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    pub fn encoder(&self) -> &CategoryEncoder {
        &self.encoder
    }
    pub fn anomaly(&self) -> &AnomalyDetector {
        &self.anomaly
    }
    pub fn classifier(&self) -> &RootCauseClassifier {
        &self.classifier
    }
    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }
    pub fn cases(&self) -> &[HistoricalCase] {
        &self.cases
    }
    pub fn rules(&self) -> &[ValuationRule] {
        &self.rules
    }
    pub fn stats(&self) -> &CaseStats {
        &self.stats
    }
}

/// Shared handle; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EngineHandle {
    inner: Arc<RwLock<Option<Arc<ModelSnapshot>>>>,
}

impl EngineHandle {
    pub fn new_untrained() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ModelSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(Arc::new(snapshot)))),
        }
    }

    /// Current snapshot, or ModelNotTrained when none has been installed.
    pub fn snapshot(&self) -> Result<Arc<ModelSnapshot>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(EngineError::ModelNotTrained("engine"))
    }

    pub fn is_trained(&self) -> bool {
        self.snapshot().is_ok()
    }

    /// Swap in a new snapshot atomically.
    pub fn install(&self, snapshot: ModelSnapshot) {
        let next = Arc::new(snapshot);
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(next);
    }

    /// Train off-lock, then swap. On failure the previous snapshot stays in place.
    pub fn retrain(&self, set: &TrainingSet, config: &EngineConfig) -> Result<SnapshotInfo> {
        let snapshot = ModelSnapshot::train(set, config)?;
        let info = snapshot.info();
        self.install(snapshot);
        info!(target: ENGINE, cases = info.cases, "model snapshot swapped in");
        Ok(info)
    }

    pub fn analyze_one(&self, record: &DifferenceRecord) -> Result<AnalysisResult> {
        self.snapshot()?.analyze_one(record)
    }

    pub fn analyze_batch(&self, records: &[DifferenceRecord]) -> Result<BatchAnalysis> {
        self.snapshot()?.analyze_batch(records)
    }
}
