//! Field-level decomposition of a difference into price, FX and accrued-interest parts.
//!
//! Only possible when the record carries the breakdown columns (quantity, both prices,
//! both FX rates). Accrued interest is optional and counts as zero when absent.

use serde::Serialize;

use crate::records::DifferenceRecord;

const PRICE_EPS: f64 = 1e-4;
const FX_EPS: f64 = 1e-4;
const ACCRUED_EPS: f64 = 0.01;
/// Below this total absolute contribution, shares are reported as zero.
const MIN_TOTAL_CONTRIBUTION: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDecomposition {
    pub price_diff: f64,
    pub price_contribution: f64,
    /// Percent of the total absolute contribution.
    pub price_share: f64,
    pub fx_diff: f64,
    pub fx_contribution: f64,
    pub fx_share: f64,
    pub accrued_diff: f64,
    pub accrued_contribution: f64,
    pub accrued_share: f64,
    pub has_price_diff: bool,
    pub has_fx_diff: bool,
    pub has_accrued_diff: bool,
}

pub fn decompose(record: &DifferenceRecord) -> Option<FieldDecomposition> {
    let quantity = record.quantity?;
    let (pc, pi) = (record.price_custodian?, record.price_internal?);
    let (fc, fi) = (record.fx_rate_custodian?, record.fx_rate_internal?);
    let values = [quantity, pc, pi, fc, fi];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let price_diff = pc - pi;
    let price_contribution = price_diff * quantity * fc;

    let fx_diff = fc - fi;
    let fx_contribution = pi * quantity * fx_diff;

    let accrued_diff = record.accrued_interest_custodian.unwrap_or(0.0)
        - record.accrued_interest_internal.unwrap_or(0.0);
    let accrued_contribution = if accrued_diff.is_finite() { accrued_diff } else { 0.0 };

    let total = price_contribution.abs() + fx_contribution.abs() + accrued_contribution.abs();
    let share = |c: f64| {
        if total > MIN_TOTAL_CONTRIBUTION {
            c.abs() / total * 100.0
        } else {
            0.0
        }
    };

    Some(FieldDecomposition {
        price_diff,
        price_contribution,
        price_share: share(price_contribution),
        fx_diff,
        fx_contribution,
        fx_share: share(fx_contribution),
        accrued_diff: accrued_contribution,
        accrued_contribution,
        accrued_share: share(accrued_contribution),
        has_price_diff: price_diff.abs() > PRICE_EPS,
        has_fx_diff: fx_diff.abs() > FX_EPS,
        has_accrued_diff: accrued_contribution.abs() > ACCRUED_EPS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record() -> DifferenceRecord {
        let mut r = DifferenceRecord::new(
            "VD1",
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            "Bond",
            1_000.0,
            1_000.0,
        );
        r.quantity = Some(100.0);
        r.price_custodian = Some(10.0);
        r.price_internal = Some(10.0);
        r.fx_rate_custodian = Some(1.0);
        r.fx_rate_internal = Some(1.0);
        r
    }

    #[test]
    fn missing_breakdown_columns_yield_none() {
        let mut r = record();
        r.quantity = None;
        assert!(decompose(&r).is_none());
    }

    #[test]
    fn price_only_difference_takes_full_share() {
        let mut r = record();
        r.price_custodian = Some(10.5);
        let d = decompose(&r).unwrap();
        assert!((d.price_contribution - 50.0).abs() < 1e-9);
        assert!((d.price_share - 100.0).abs() < 1e-9);
        assert_eq!(d.fx_share, 0.0);
        assert!(d.has_price_diff && !d.has_fx_diff && !d.has_accrued_diff);
    }

    #[test]
    fn shares_sum_to_hundred() {
        let mut r = record();
        r.price_custodian = Some(10.2);
        r.fx_rate_custodian = Some(1.01);
        r.accrued_interest_custodian = Some(15.0);
        r.accrued_interest_internal = Some(5.0);
        let d = decompose(&r).unwrap();
        let total = d.price_share + d.fx_share + d.accrued_share;
        assert!((total - 100.0).abs() < 1e-9);
        assert!(d.has_accrued_diff);
    }

    #[test]
    fn negligible_total_reports_zero_shares() {
        let d = decompose(&record()).unwrap();
        assert_eq!((d.price_share, d.fx_share, d.accrued_share), (0.0, 0.0, 0.0));
    }
}
