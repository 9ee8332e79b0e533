//! history.rs — bounded in-memory log of recent analyses for quick diagnostics.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::analysis::AnalysisResult;
use crate::decision::Urgency;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub ts_unix: u64,
    pub record_id: String,
    pub urgency: Urgency,
    pub predicted_type: String,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub analysis_failed: bool,
}

#[derive(Debug)]
pub struct AnalysisLog {
    inner: Mutex<Vec<HistoryEntry>>,
    cap: usize,
}

impl AnalysisLog {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.min(10_000),
        }
    }

    pub fn push(&self, r: &AnalysisResult) {
        let entry = HistoryEntry {
            ts_unix: now_unix(),
            record_id: r.record_id.clone(),
            urgency: r.urgency,
            predicted_type: r.predicted_type.clone(),
            is_anomaly: r.is_anomaly,
            confidence: r.confidence,
            analysis_failed: r.analysis_failed,
        };

        let mut v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn extend<'a>(&self, results: impl IntoIterator<Item = &'a AnalysisResult>) {
        for r in results {
            self.push(r);
        }
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<HistoryEntry> {
        let v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
