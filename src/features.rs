//! Feature extraction: records and cases → fixed-width numeric vectors.
//!
//! Layout shared by both models:
//! - anomaly input:    `[|difference|, |difference_pct|, resolution_time or placeholder]`
//! - classifier input: `[|difference|, |difference_pct|, asset_class index]`
//!
//! Missing numeric fields become `0.0` and are flagged in [`MissingFields`] so callers
//! can tell "zero difference" from "no value".

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::records::{DifferenceRecord, HistoricalCase};

/// Stand-in resolution time for records that are not resolved yet (minutes).
pub const RESOLUTION_TIME_PLACEHOLDER: f64 = 30.0;

pub const N_FEATURES: usize = 3;

/// Which numeric slots were absent and zero-filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissingFields {
    pub difference: bool,
    pub difference_pct: bool,
    /// Always true for live records (placeholder used), false for resolved cases.
    pub resolution_time: bool,
}

impl MissingFields {
    /// True when any *observed* value was missing (the resolution placeholder does not count).
    pub fn any_observed(&self) -> bool {
        self.difference || self.difference_pct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub numeric: [f64; N_FEATURES],
    pub asset_class: usize,
    pub missing: MissingFields,
}

impl FeatureVector {
    pub fn anomaly_input(&self) -> [f64; N_FEATURES] {
        self.numeric
    }

    pub fn classifier_input(&self) -> [f64; N_FEATURES] {
        [self.numeric[0], self.numeric[1], self.asset_class as f64]
    }
}

/// Fixed category → index mapping, established from the training corpus.
///
/// Lookup is case-insensitive on the trimmed name; anything unseen maps to
/// the reserved [`CategoryEncoder::other_index`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryEncoder {
    index: BTreeMap<String, usize>,
}

impl CategoryEncoder {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(categories: I) -> Self {
        let mut names: Vec<String> = categories.into_iter().map(normalize_category).collect();
        names.sort();
        names.dedup();
        names.retain(|n| !n.is_empty());
        let index = names.into_iter().enumerate().map(|(i, n)| (n, i)).collect();
        Self { index }
    }

    pub fn encode(&self, category: &str) -> usize {
        self.index
            .get(&normalize_category(category))
            .copied()
            .unwrap_or_else(|| self.other_index())
    }

    pub fn is_known(&self, category: &str) -> bool {
        self.index.contains_key(&normalize_category(category))
    }

    /// Reserved bucket for categories not seen at fit time.
    pub fn other_index(&self) -> usize {
        self.index.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }
}

fn normalize_category(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Extract features from a live difference record.
///
/// Fails only on values that cannot be repaired (non-finite numbers, inconsistent
/// derived fields); missing values are zero-filled and flagged.
pub fn extract_record(record: &DifferenceRecord, encoder: &CategoryEncoder) -> Result<FeatureVector> {
    record.validate()?;

    let mut missing = MissingFields {
        resolution_time: true,
        ..Default::default()
    };

    let difference = match record.effective_difference() {
        Some(v) => v.abs(),
        None => {
            missing.difference = true;
            0.0
        }
    };
    let pct = match record.effective_difference_pct() {
        Some(v) => v.abs(),
        None => {
            missing.difference_pct = true;
            0.0
        }
    };

    Ok(FeatureVector {
        numeric: [difference, pct, RESOLUTION_TIME_PLACEHOLDER],
        asset_class: encoder.encode(&record.asset_class),
        missing,
    })
}

/// Extract features from a resolved case (training side).
pub fn extract_case(case: &HistoricalCase, encoder: &CategoryEncoder) -> Result<FeatureVector> {
    if !case.difference_amount.is_finite() || !case.difference_pct.is_finite() {
        return Err(EngineError::data(
            format!("case {}", case.case_id),
            "difference values must be finite",
        ));
    }
    Ok(FeatureVector {
        numeric: [
            case.difference_amount.abs(),
            case.difference_pct.abs(),
            f64::from(case.resolution_time),
        ],
        asset_class: encoder.encode(&case.asset_class),
        missing: MissingFields::default(),
    })
}
