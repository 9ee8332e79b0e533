//! decision.rs — output shapes for recommendations: urgency, explainability reasons,
//! alternative solutions.

use serde::{Deserialize, Serialize};

use crate::case_stats::RootCauseCandidate;

/// Declared type when the classifier is not confident enough.
pub const UNDETERMINED_TYPE: &str = "Undetermined";

/// How soon a difference needs attention. Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub const ALL: [Urgency; 4] = [
        Urgency::Low,
        Urgency::Medium,
        Urgency::High,
        Urgency::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

/// Reason shown to the user (explainability).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub message: String,
    /// Optional weight in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ReasonKind>,
}

/// Coarse reason categories, kept stable for UI and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    Anomaly,
    Classification,
    Similarity,
    Rule,
    Threshold,
    Fallback,
}

/// Where a resolution suggestion came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolutionSource {
    HistoricalCase { case_id: String },
    RuleEngine,
    Template,
}

/// One ranked resolution suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionCandidate {
    pub solution: String,
    pub source: SolutionSource,
    /// Similarity for historical cases, expected success rate for rule suggestions.
    pub score: f64,
    /// Typical minutes to apply.
    pub avg_time: u32,
}

/// Everything the synthesizer decides for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// Predicted type when confident, otherwise [`UNDETERMINED_TYPE`].
    pub declared_type: String,
    /// Type of the best similar case, offered when the declared type is undetermined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    pub recommended_resolution: String,
    pub resolution_source: SolutionSource,
    /// Minutes.
    pub estimated_resolution_time: f64,
    pub urgency: Urgency,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub root_cause_candidates: Vec<RootCauseCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternative_solutions: Vec<SolutionCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Reason>,
}

impl Reason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            weight: None,
            kind: None,
        }
    }

    pub fn weighted(mut self, w: f64) -> Self {
        self.weight = Some(clamp01(w));
        self
    }

    pub fn kind(mut self, kind: ReasonKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl SolutionCandidate {
    pub fn from_case(case_id: impl Into<String>, solution: impl Into<String>, similarity: f64, avg_time: u32) -> Self {
        Self {
            solution: solution.into(),
            source: SolutionSource::HistoricalCase {
                case_id: case_id.into(),
            },
            score: clamp01(similarity),
            avg_time,
        }
    }

    pub fn from_rule(solution: impl Into<String>, success_rate: f64, avg_time: u32) -> Self {
        Self {
            solution: solution.into(),
            source: SolutionSource::RuleEngine,
            score: clamp01(success_rate),
            avg_time,
        }
    }
}

pub(crate) fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urgency_orders_and_serializes_lowercase() {
        assert!(Urgency::Low < Urgency::Medium);
        assert!(Urgency::High < Urgency::Critical);
        assert_eq!(serde_json::to_value(Urgency::Critical).unwrap(), json!("critical"));
    }

    #[test]
    fn reason_builder_clamps_weight() {
        let r = Reason::new("anomaly score -0.71 below threshold -0.55")
            .kind(ReasonKind::Anomaly)
            .weighted(1.7);
        assert_eq!(r.weight, Some(1.0));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["kind"], json!("anomaly"));
    }

    #[test]
    fn solution_source_is_tagged() {
        let s = SolutionCandidate::from_case("CASE007", "Refresh vendor price", 0.81, 45);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["source"]["kind"], json!("historical_case"));
        assert_eq!(v["source"]["case_id"], json!("CASE007"));
        let r = SolutionCandidate::from_rule("Align FX source and snapshot time", 0.95, 15);
        assert_eq!(serde_json::to_value(&r).unwrap()["source"]["kind"], json!("rule_engine"));
    }
}
