// src/lib.rs
// Public library surface for the server, the CSV tool and integration tests.

pub mod analysis;
pub mod anomaly;
pub mod api;
pub mod case_stats;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod decompose;
pub mod error;
pub mod features;
pub mod history;
pub mod metrics;
pub mod recommend;
pub mod records;
pub mod similarity;
pub mod snapshot;

// ---- Re-exports for stable public API ----
pub use crate::analysis::{AnalysisResult, BatchAnalysis, BatchSummary};
pub use crate::api::router;
pub use crate::config::EngineConfig;
pub use crate::decision::Urgency;
pub use crate::error::{EngineError, Result};
pub use crate::records::{DifferenceRecord, HistoricalCase, Status, TrainingSet, ValuationRule};
pub use crate::snapshot::{EngineHandle, ModelSnapshot, SnapshotInfo};

use tracing::info;

/// Load the configured training data and build the first snapshot.
pub fn bootstrap(config: &EngineConfig) -> anyhow::Result<ModelSnapshot> {
    let set = dataset::load_training_set(&config.data.cases_path, &config.data.rules_path)?;
    let snapshot = ModelSnapshot::train(&set, config)?;
    info!(
        cases = set.cases.len(),
        rules = set.rules.len(),
        "engine bootstrapped"
    );
    Ok(snapshot)
}
