//! Data contracts: difference records, resolved historical cases and valuation rules.
//!
//! Field names match the tabular column names one-to-one so the same structs
//! deserialize from CSV rows and JSON bodies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Absolute tolerance for a supplied `difference` (currency units, cent rounding).
const DIFFERENCE_ABS_TOLERANCE: f64 = 0.01;
/// Absolute tolerance for a supplied `difference_pct` (percent, 4-dp rounding).
const PCT_ABS_TOLERANCE: f64 = 5e-5;
/// Relative tolerance shared by both checks.
const DERIVED_REL_TOLERANCE: f64 = 1e-6;

/// Lifecycle of a difference record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    #[serde(alias = "Open", alias = "pending", alias = "Pending")]
    Open,
    #[serde(alias = "Analyzing")]
    Analyzing,
    #[serde(alias = "Resolved")]
    Resolved,
    #[serde(alias = "Closed", alias = "matched", alias = "Matched")]
    Closed,
}

/// One observed valuation discrepancy.
///
/// `difference = internal_value - custodian_value` and
/// `difference_pct = difference / custodian_value * 100`. Both are optional so a
/// caller may supply only the derived pair, only the values, or both (then they must agree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceRecord {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub fund_code: String,
    #[serde(default)]
    pub fund_name: String,
    #[serde(default)]
    pub security_code: String,
    #[serde(default)]
    pub security_name: String,
    pub asset_class: String,
    #[serde(default)]
    pub custodian_value: Option<f64>,
    #[serde(default)]
    pub internal_value: Option<f64>,
    #[serde(default)]
    pub difference: Option<f64>,
    #[serde(default)]
    pub difference_pct: Option<f64>,
    #[serde(default)]
    pub status: Status,

    // Optional breakdown columns (used for field decomposition).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_custodian: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_internal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx_rate_custodian: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx_rate_internal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrued_interest_custodian: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrued_interest_internal: Option<f64>,
}

impl DifferenceRecord {
    /// Build a record from the two valuations; derived fields are computed here.
    pub fn new(
        id: impl Into<String>,
        date: NaiveDate,
        asset_class: impl Into<String>,
        custodian_value: f64,
        internal_value: f64,
    ) -> Self {
        let mut r = Self {
            id: id.into(),
            date,
            fund_code: String::new(),
            fund_name: String::new(),
            security_code: String::new(),
            security_name: String::new(),
            asset_class: asset_class.into(),
            custodian_value: Some(custodian_value),
            internal_value: Some(internal_value),
            difference: None,
            difference_pct: None,
            status: Status::Open,
            quantity: None,
            price_custodian: None,
            price_internal: None,
            fx_rate_custodian: None,
            fx_rate_internal: None,
            accrued_interest_custodian: None,
            accrued_interest_internal: None,
        };
        r.difference = r.derived_difference();
        r.difference_pct = r.derived_difference_pct();
        r
    }

    pub fn with_fund(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.fund_code = code.into();
        self.fund_name = name.into();
        self
    }

    pub fn with_security(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.security_code = code.into();
        self.security_name = name.into();
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// `internal - custodian`, when both values are present.
    pub fn derived_difference(&self) -> Option<f64> {
        Some(self.internal_value? - self.custodian_value?)
    }

    /// `difference / custodian * 100`, when defined.
    pub fn derived_difference_pct(&self) -> Option<f64> {
        let custodian = self.custodian_value?;
        let diff = self.derived_difference()?;
        if custodian == 0.0 {
            return None;
        }
        Some(diff / custodian * 100.0)
    }

    /// Difference, taking the supplied column first and the derived value second.
    pub fn effective_difference(&self) -> Option<f64> {
        self.difference.or_else(|| self.derived_difference())
    }

    pub fn effective_difference_pct(&self) -> Option<f64> {
        self.difference_pct.or_else(|| self.derived_difference_pct())
    }

    /// Check identifiers, finiteness and consistency of the derived pair.
    pub fn validate(&self) -> Result<()> {
        let ctx = || format!("record {}", self.id);
        if self.id.trim().is_empty() {
            return Err(EngineError::data("record", "id is empty"));
        }
        if self.asset_class.trim().is_empty() {
            return Err(EngineError::data(ctx(), "asset_class is empty"));
        }
        for (name, v) in [
            ("custodian_value", self.custodian_value),
            ("internal_value", self.internal_value),
            ("difference", self.difference),
            ("difference_pct", self.difference_pct),
        ] {
            if let Some(x) = v {
                if !x.is_finite() {
                    return Err(EngineError::data(ctx(), format!("{name} is not finite")));
                }
            }
        }

        if let (Some(c), Some(d)) = (self.custodian_value, self.effective_difference()) {
            if c == 0.0 && d != 0.0 && self.difference_pct.is_none() {
                return Err(EngineError::data(
                    ctx(),
                    "difference_pct is undefined for a zero custodian_value",
                ));
            }
        }

        if let (Some(given), Some(derived)) = (self.difference, self.derived_difference()) {
            if !approx_eq(given, derived, DIFFERENCE_ABS_TOLERANCE) {
                return Err(EngineError::data(
                    ctx(),
                    format!("difference {given} disagrees with internal - custodian = {derived}"),
                ));
            }
        }
        if let (Some(given), Some(derived)) = (self.difference_pct, self.derived_difference_pct()) {
            if !approx_eq(given, derived, PCT_ABS_TOLERANCE) {
                return Err(EngineError::data(
                    ctx(),
                    format!("difference_pct {given} disagrees with derived {derived}"),
                ));
            }
        }
        Ok(())
    }
}

fn approx_eq(a: f64, b: f64, abs_tolerance: f64) -> bool {
    let diff = (a - b).abs();
    diff <= abs_tolerance || diff <= DERIVED_REL_TOLERANCE * a.abs().max(b.abs())
}

/// A previously resolved difference. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalCase {
    pub case_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub fund_code: String,
    #[serde(default)]
    pub security_code: String,
    pub asset_class: String,
    pub difference_type: String,
    pub root_cause: String,
    pub difference_amount: f64,
    pub difference_pct: f64,
    pub resolution: String,
    /// Minutes; always positive.
    pub resolution_time: u32,
    #[serde(default)]
    pub resolved_by: String,
}

impl HistoricalCase {
    /// Free-text description used by the similarity index.
    pub fn description(&self) -> String {
        format!(
            "{} {} {}",
            self.difference_type, self.root_cause, self.asset_class
        )
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = || format!("case {}", self.case_id);
        if self.case_id.trim().is_empty() {
            return Err(EngineError::data("case", "case_id is empty"));
        }
        if self.difference_type.trim().is_empty() {
            return Err(EngineError::data(ctx(), "difference_type is empty"));
        }
        if self.resolution_time == 0 {
            return Err(EngineError::data(ctx(), "resolution_time must be positive"));
        }
        if !self.difference_amount.is_finite() || !self.difference_pct.is_finite() {
            return Err(EngineError::data(ctx(), "difference values must be finite"));
        }
        Ok(())
    }
}

/// Static threshold/action pair consumed by urgency assessment. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRule {
    pub rule_id: String,
    /// Asset class this rule covers, or `All`.
    pub asset_class: String,
    #[serde(default)]
    pub rule_type: String,
    #[serde(default)]
    pub rule_description: String,
    pub threshold_amount: f64,
    /// Percent, same unit as `difference_pct`.
    pub threshold_pct: f64,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_priority() -> u8 {
    1
}
fn default_active() -> bool {
    true
}

impl ValuationRule {
    pub fn applies_to(&self, asset_class: &str) -> bool {
        self.is_active
            && (self.asset_class.eq_ignore_ascii_case("all")
                || self.asset_class.trim().eq_ignore_ascii_case(asset_class.trim()))
    }

    /// Both thresholds must be reached for the rule to count as breached.
    pub fn is_breached(&self, amount_abs: f64, pct_abs: f64) -> bool {
        amount_abs >= self.threshold_amount && pct_abs >= self.threshold_pct
    }
}

/// Everything a retrain needs: the case corpus plus the rule table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub cases: Vec<HistoricalCase>,
    #[serde(default)]
    pub rules: Vec<ValuationRule>,
}

impl TrainingSet {
    pub fn new(cases: Vec<HistoricalCase>, rules: Vec<ValuationRule>) -> Self {
        Self { cases, rules }
    }

    pub fn validate(&self) -> Result<()> {
        self.cases.iter().try_for_each(HistoricalCase::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    #[test]
    fn new_derives_difference_and_pct() {
        let r = DifferenceRecord::new("VD1", d(), "Bond", 10_000.0, 15_000.0);
        assert_eq!(r.difference, Some(5_000.0));
        assert!((r.difference_pct.unwrap() - 50.0).abs() < 1e-9);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn inconsistent_supplied_difference_is_rejected() {
        let mut r = DifferenceRecord::new("VD1", d(), "Bond", 10_000.0, 15_000.0);
        r.difference = Some(-5_000.0);
        let err = r.validate().unwrap_err();
        assert!(matches!(err, EngineError::Data { .. }), "{err}");
    }

    #[test]
    fn supplied_pct_must_match_the_values() {
        // derived pct is 0.104
        let mut r = DifferenceRecord::new("VD1", d(), "Bond", 10_000.0, 10_010.4);
        r.difference_pct = Some(0.095);
        assert!(r.validate().is_err());

        let mut r = DifferenceRecord::new("VD2", d(), "Bond", 10_000.0, 10_001.1);
        r.difference_pct = Some(0.002);
        assert!(r.validate().is_err());

        // 4-dp rounding of 0.01234 still passes
        let mut r = DifferenceRecord::new("VD3", d(), "Bond", 1_000_000.0, 1_000_123.4);
        r.difference_pct = Some(0.0123);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn zero_custodian_without_pct_is_rejected() {
        let r = DifferenceRecord::new("VD2", d(), "Cash", 0.0, 10.0);
        assert!(r.difference_pct.is_none());
        assert!(r.validate().is_err());
    }

    #[test]
    fn status_accepts_legacy_aliases() {
        let s: Status = serde_json::from_str("\"Pending\"").unwrap();
        assert_eq!(s, Status::Open);
        let s: Status = serde_json::from_str("\"matched\"").unwrap();
        assert_eq!(s, Status::Closed);
        assert_eq!(serde_json::to_string(&Status::Analyzing).unwrap(), "\"analyzing\"");
    }

    #[test]
    fn rule_matching_respects_wildcard_and_activity() {
        let mut rule = ValuationRule {
            rule_id: "RULE005".into(),
            asset_class: "All".into(),
            rule_type: "fx".into(),
            rule_description: String::new(),
            threshold_amount: 50.0,
            threshold_pct: 0.005,
            priority: 3,
            is_active: true,
        };
        assert!(rule.applies_to("Equity"));
        assert!(rule.is_breached(60.0, 0.01));
        assert!(!rule.is_breached(40.0, 0.01));
        rule.is_active = false;
        assert!(!rule.applies_to("Equity"));
    }
}
