use std::time::Duration;

use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::analysis::{AnalysisResult, BatchSummary};
use crate::snapshot::SnapshotInfo;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Callable once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

// Recording helpers are no-ops until a recorder is installed.

pub fn record_analysis(r: &AnalysisResult) {
    counter!("valuation_analyses_total").increment(1);
    if r.analysis_failed {
        counter!("valuation_analysis_failures_total").increment(1);
    } else if r.is_anomaly {
        counter!("valuation_anomalies_total").increment(1);
    }
}

pub fn record_batch(summary: &BatchSummary, elapsed: Duration) {
    counter!("valuation_analyses_total").increment(summary.count as u64);
    counter!("valuation_anomalies_total").increment(summary.anomaly_count as u64);
    counter!("valuation_analysis_failures_total").increment(summary.failed as u64);
    histogram!("valuation_batch_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

pub fn record_retrain(info: &SnapshotInfo) {
    counter!("valuation_retrains_total").increment(1);
    gauge!("valuation_model_cases").set(info.cases as f64);
}
