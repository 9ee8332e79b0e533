//! Aggregates over the historical corpus: resolution-time means and root-cause frequencies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::records::HistoricalCase;

/// A root cause seen for a difference type, with how often it occurred.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCauseCandidate {
    pub root_cause: String,
    pub frequency: usize,
    /// Share of the type's cases with this root cause, in [0, 1].
    pub share: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CaseStats {
    type_time: BTreeMap<String, (u64, usize)>,
    total_time: u64,
    total_cases: usize,
    root_causes: BTreeMap<String, BTreeMap<String, usize>>,
}

impl CaseStats {
    pub fn from_cases(cases: &[HistoricalCase]) -> Self {
        let mut stats = Self::default();
        for c in cases {
            let slot = stats
                .type_time
                .entry(c.difference_type.clone())
                .or_insert((0, 0));
            slot.0 += u64::from(c.resolution_time);
            slot.1 += 1;
            stats.total_time += u64::from(c.resolution_time);
            stats.total_cases += 1;
            *stats
                .root_causes
                .entry(c.difference_type.clone())
                .or_default()
                .entry(c.root_cause.clone())
                .or_default() += 1;
        }
        stats
    }

    /// Number of cases per difference type.
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        self.type_time
            .iter()
            .map(|(t, (_, n))| (t.clone(), *n))
            .collect()
    }

    pub fn mean_resolution_time(&self, difference_type: &str) -> Option<f64> {
        self.type_time
            .get(difference_type)
            .filter(|(_, n)| *n > 0)
            .map(|(sum, n)| *sum as f64 / *n as f64)
    }

    pub fn global_mean_resolution_time(&self) -> Option<f64> {
        (self.total_cases > 0).then(|| self.total_time as f64 / self.total_cases as f64)
    }

    /// Most frequent root causes for a type; frequency desc, then name.
    pub fn top_root_causes(&self, difference_type: &str, n: usize) -> Vec<RootCauseCandidate> {
        let Some(causes) = self.root_causes.get(difference_type) else {
            return Vec::new();
        };
        let total: usize = causes.values().sum();
        let mut ranked: Vec<(&String, &usize)> = causes.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(n)
            .map(|(cause, &frequency)| RootCauseCandidate {
                root_cause: cause.clone(),
                frequency,
                share: frequency as f64 / total.max(1) as f64,
            })
            .collect()
    }

    pub fn top_root_cause(&self, difference_type: &str) -> Option<String> {
        self.top_root_causes(difference_type, 1)
            .into_iter()
            .next()
            .map(|c| c.root_cause)
    }
}
