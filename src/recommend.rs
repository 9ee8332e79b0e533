//! # Recommendation Synthesizer
//! Pure, deterministic logic mapping (anomaly verdict, prediction, similar cases, rules)
//! → [`Recommendation`]. No I/O, no model access; everything it needs is passed in.
//!
//! Policy:
//! 1. Confident prediction (`confidence >= confidence_threshold`) sets the declared type;
//!    otherwise the type is "Undetermined" and the best similar case's type is the working guess.
//! 2. Resolution = best match's resolution when its similarity clears the bar, else a template.
//! 3. Estimated time = similarity-weighted mean over the matches when the best one clears the
//!    bar, else the type mean, else the corpus mean, else the configured default.
//! 4. Urgency from anomaly status, |difference_pct| bands and breached valuation rules.

use crate::anomaly::AnomalyScore;
use crate::case_stats::CaseStats;
use crate::classifier::Prediction;
use crate::config::{RecommendationConfig, UrgencyConfig};
use crate::decision::{
    clamp01, Reason, ReasonKind, Recommendation, SolutionCandidate, SolutionSource, Urgency,
    UNDETERMINED_TYPE,
};
use crate::decompose::FieldDecomposition;
use crate::records::{HistoricalCase, ValuationRule};

const MAX_ROOT_CAUSES: usize = 3;
const CASE_SOLUTIONS: usize = 3;
const MAX_SOLUTIONS: usize = 5;

/// A matched historical case with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct SimilarCase<'a> {
    pub case: &'a HistoricalCase,
    pub similarity: f64,
}

/// Per-record inputs.
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub asset_class: &'a str,
    /// |difference|, 0 when missing.
    pub amount_abs: f64,
    /// |difference_pct| in percent, 0 when missing.
    pub pct_abs: f64,
    pub anomaly: AnomalyScore,
    pub prediction: &'a Prediction,
    /// Best first.
    pub similar: &'a [SimilarCase<'a>],
    pub decomposition: Option<&'a FieldDecomposition>,
}

/// Shared, read-only knowledge the synthesizer consults.
#[derive(Debug, Clone, Copy)]
pub struct Knowledge<'a> {
    pub stats: &'a CaseStats,
    pub rules: &'a [ValuationRule],
    pub recommendation: &'a RecommendationConfig,
    pub urgency: &'a UrgencyConfig,
}

pub fn synthesize(ev: &Evidence<'_>, kb: &Knowledge<'_>) -> Recommendation {
    let cfg = kb.recommendation;
    let mut reasons = Vec::new();

    // 1) Declared type
    let confident = ev.prediction.confidence >= cfg.confidence_threshold;
    let best = ev.similar.first();
    let (declared_type, type_hint) = if confident {
        reasons.push(
            Reason::new(format!(
                "Classified as {} with confidence {:.2}",
                ev.prediction.label, ev.prediction.confidence
            ))
            .kind(ReasonKind::Classification)
            .weighted(ev.prediction.confidence),
        );
        (ev.prediction.label.clone(), None)
    } else {
        let hint = best.map(|b| b.case.difference_type.clone());
        reasons.push(
            Reason::new(format!(
                "Classifier confidence {:.2} below {:.2}; type undetermined{}",
                ev.prediction.confidence,
                cfg.confidence_threshold,
                hint.as_deref()
                    .map(|h| format!(", closest case suggests {h}"))
                    .unwrap_or_default()
            ))
            .kind(ReasonKind::Classification)
            .weighted(ev.prediction.confidence),
        );
        (UNDETERMINED_TYPE.to_string(), hint)
    };
    let working_type = type_hint
        .clone()
        .unwrap_or_else(|| ev.prediction.label.clone());

    // 2) Resolution text
    let strong_match = best.filter(|b| b.similarity > cfg.resolution_similarity_bar);
    let (recommended_resolution, resolution_source) = match strong_match {
        Some(b) => {
            reasons.push(
                Reason::new(format!(
                    "Resolution reused from case {} (similarity {:.2})",
                    b.case.case_id, b.similarity
                ))
                .kind(ReasonKind::Similarity)
                .weighted(b.similarity),
            );
            (
                b.case.resolution.clone(),
                SolutionSource::HistoricalCase {
                    case_id: b.case.case_id.clone(),
                },
            )
        }
        None => {
            reasons.push(
                Reason::new(format!(
                    "No case above similarity {:.2}; using the {} template",
                    cfg.resolution_similarity_bar, working_type
                ))
                .kind(ReasonKind::Fallback),
            );
            (template_for(&working_type, cfg), SolutionSource::Template)
        }
    };

    // 3) Time estimate
    let estimated_resolution_time = round1(estimate_minutes(
        ev.similar,
        strong_match.is_some(),
        &working_type,
        kb,
    ));

    // 4) Urgency
    let breached: Vec<&ValuationRule> = kb
        .rules
        .iter()
        .filter(|r| r.applies_to(ev.asset_class) && r.is_breached(ev.amount_abs, ev.pct_abs))
        .collect();
    let urgency = assess_urgency(ev.anomaly.is_anomaly, ev.pct_abs, !breached.is_empty(), kb.urgency);

    if ev.anomaly.is_anomaly {
        reasons.push(
            Reason::new(format!(
                "Anomalous difference (score {:.3}, severity {:.1}/10)",
                ev.anomaly.score,
                ev.anomaly.severity()
            ))
            .kind(ReasonKind::Anomaly)
            .weighted(ev.anomaly.severity() / 10.0),
        );
    }
    for rule in breached.iter().take(3) {
        reasons.push(
            Reason::new(format!(
                "Rule {} breached: |difference| {:.2} >= {:.2} and |pct| {:.4}% >= {:.4}%",
                rule.rule_id, ev.amount_abs, rule.threshold_amount, ev.pct_abs, rule.threshold_pct
            ))
            .kind(ReasonKind::Rule),
        );
    }
    reasons.push(
        Reason::new(format!(
            "Urgency {} (|pct| {:.4}%, bands {:.2}% / {:.2}%)",
            urgency.as_str(),
            ev.pct_abs,
            kb.urgency.medium_pct,
            kb.urgency.high_pct
        ))
        .kind(ReasonKind::Threshold),
    );

    Recommendation {
        declared_type,
        type_hint,
        recommended_resolution,
        resolution_source,
        estimated_resolution_time,
        urgency,
        root_cause_candidates: kb.stats.top_root_causes(&working_type, MAX_ROOT_CAUSES),
        alternative_solutions: alternative_solutions(ev, &working_type),
        reasons,
    }
}

/// Urgency bands. Monotone non-decreasing in `pct_abs` for fixed anomaly status.
/// Band edges are exclusive: a pct exactly on a mark stays in the lower band.
pub fn assess_urgency(is_anomaly: bool, pct_abs: f64, rule_breached: bool, cfg: &UrgencyConfig) -> Urgency {
    let large = pct_abs > cfg.high_pct;
    if is_anomaly && large {
        Urgency::Critical
    } else if is_anomaly || large {
        Urgency::High
    } else if pct_abs > cfg.medium_pct || rule_breached {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

fn estimate_minutes(similar: &[SimilarCase<'_>], strong_match: bool, working_type: &str, kb: &Knowledge<'_>) -> f64 {
    if strong_match {
        let (num, den) = similar.iter().fold((0.0, 0.0), |(num, den), s| {
            let w = clamp01(s.similarity);
            (num + w * f64::from(s.case.resolution_time), den + w)
        });
        if den > 0.0 {
            return num / den;
        }
    }
    kb.stats
        .mean_resolution_time(working_type)
        .or_else(|| kb.stats.global_mean_resolution_time())
        .unwrap_or_else(|| f64::from(kb.recommendation.default_resolution_minutes))
}

/// Configured template, then the built-in one, then a generic line.
pub fn template_for(difference_type: &str, cfg: &RecommendationConfig) -> String {
    if let Some(t) = cfg.templates.get(difference_type) {
        return t.clone();
    }
    let builtin = match difference_type {
        "Pricing Error" => "Compare price source and pricing timestamp with the custodian; refresh the internal price if stale.",
        "FX Rate Mismatch" => "Align the FX rate source and snapshot time with the custodian.",
        "Accrued Interest Mismatch" => "Recalculate accrued interest and confirm the day-count convention and coupon schedule.",
        "Position Mismatch" => "Reconcile the held quantity against the custodian position statement, including pending trades.",
        "Fee Mismatch" => "Check fee accrual parameters and the accrual period against the fund agreement.",
        _ => "",
    };
    if builtin.is_empty() {
        format!("Investigate the {difference_type} difference: compare custodian and internal valuation inputs field by field.")
    } else {
        builtin.to_string()
    }
}

fn alternative_solutions(ev: &Evidence<'_>, working_type: &str) -> Vec<SolutionCandidate> {
    let mut all: Vec<SolutionCandidate> = ev
        .similar
        .iter()
        .take(CASE_SOLUTIONS)
        .map(|s| {
            SolutionCandidate::from_case(
                s.case.case_id.clone(),
                s.case.resolution.clone(),
                s.similarity,
                s.case.resolution_time,
            )
        })
        .collect();
    all.extend(rule_solutions(ev, working_type));

    let mut unique: Vec<SolutionCandidate> = Vec::with_capacity(all.len());
    for s in all {
        if !unique.iter().any(|u| u.solution == s.solution) {
            unique.push(s);
        }
    }
    unique.sort_by(|a, b| b.score.total_cmp(&a.score));
    unique.truncate(MAX_SOLUTIONS);
    unique
}

fn rule_solutions(ev: &Evidence<'_>, working_type: &str) -> Vec<SolutionCandidate> {
    const BOND_PRICE: (&str, f64, u32) = ("Check that bond price sources agree", 0.85, 30);
    const EQUITY_PRICE: (&str, f64, u32) = ("Confirm equity price snapshot times match", 0.90, 20);
    const ACCRUED: (&str, f64, u32) = ("Reconcile the accrued interest calculation method", 0.88, 45);
    const FX: (&str, f64, u32) = ("Align FX rate source and snapshot time", 0.95, 15);

    let is = |class: &str| ev.asset_class.trim().eq_ignore_ascii_case(class);
    let mut picks = Vec::new();
    match working_type {
        "Pricing Error" if is("Bond") => picks.push(BOND_PRICE),
        "Pricing Error" if is("Equity") => picks.push(EQUITY_PRICE),
        "Accrued Interest Mismatch" if is("Bond") => picks.push(ACCRUED),
        "FX Rate Mismatch" => picks.push(FX),
        _ => {}
    }
    if let Some(d) = ev.decomposition {
        if d.has_fx_diff {
            picks.push(FX);
        }
        if d.has_price_diff && is("Bond") {
            picks.push(BOND_PRICE);
        }
    }
    picks
        .into_iter()
        .map(|(text, rate, minutes)| SolutionCandidate::from_rule(text, rate, minutes))
        .collect()
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
