//! # Case Similarity Index
//! TF-IDF vector space over historical case descriptions, searched by cosine similarity.
//!
//! - Tokens: runs of 2+ word characters, lowercased.
//! - Vocabulary: the `max_features` most frequent corpus terms (ties alphabetical),
//!   fixed at fit time. Query terms outside it are ignored.
//! - Weights: raw term count * smoothed idf `ln((1 + n) / (1 + df)) + 1`, L2-normalised,
//!   so cosine similarity is a dot product.
//! - Ranking: similarity desc, then case date desc (most recent first), then case id.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::SimilarityConfig;
use crate::error::Result;
use crate::records::HistoricalCase;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"(?u)\b\w\w+\b").expect("static token regex"))
}

pub fn tokenize(text: &str) -> Vec<String> {
    token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// One indexed text with the metadata ranking needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub date: NaiveDate,
    pub text: String,
}

impl From<&HistoricalCase> for Document {
    fn from(case: &HistoricalCase) -> Self {
        Self {
            id: case.case_id.clone(),
            date: case.date,
            text: case.description(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    /// Position of the matched document in the fitted corpus.
    pub position: usize,
    pub case_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    config: SimilarityConfig,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
    docs: Vec<Document>,
    vectors: Vec<Vec<f64>>,
}

impl SimilarityIndex {
    /// Build the index. An empty corpus is valid and yields an index that never matches.
    pub fn fit(config: SimilarityConfig, docs: Vec<Document>) -> Result<Self> {
        config.validate()?;

        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(&d.text)).collect();

        let mut corpus_counts: HashMap<&str, usize> = HashMap::new();
        for tokens in &tokenized {
            for t in tokens {
                *corpus_counts.entry(t.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = corpus_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(config.max_features);

        // BTreeMap iteration is alphabetical, which fixes the column order.
        let mut vocabulary: BTreeMap<String, usize> =
            ranked.into_iter().map(|(t, _)| (t.to_string(), 0)).collect();
        for (i, slot) in vocabulary.values_mut().enumerate() {
            *slot = i;
        }

        let mut df = vec![0usize; vocabulary.len()];
        for tokens in &tokenized {
            let mut seen = vec![false; vocabulary.len()];
            for t in tokens {
                if let Some(&col) = vocabulary.get(t) {
                    if !seen[col] {
                        seen[col] = true;
                        df[col] += 1;
                    }
                }
            }
        }
        let n = docs.len() as f64;
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let mut index = Self {
            config,
            vocabulary,
            idf,
            docs,
            vectors: Vec::new(),
        };
        index.vectors = tokenized.iter().map(|t| index.weigh(t)).collect();

        debug!(
            target: "engine",
            documents = index.docs.len(),
            vocabulary = index.vocabulary.len(),
            "similarity index built"
        );
        Ok(index)
    }

    pub fn from_cases(config: SimilarityConfig, cases: &[HistoricalCase]) -> Result<Self> {
        Self::fit(config, cases.iter().map(Document::from).collect())
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn vectorize(&self, text: &str) -> Vec<f64> {
        self.weigh(&tokenize(text))
    }

    /// Cosine similarity of `text` to the document at `position` (0 when out of range).
    pub fn similarity(&self, text: &str, position: usize) -> f64 {
        match self.vectors.get(position) {
            Some(v) => dot(&self.vectorize(text), v),
            None => 0.0,
        }
    }

    /// Up to `top_k` documents above the noise floor, best first.
    pub fn search(&self, text: &str) -> Vec<SimilarityMatch> {
        if self.docs.is_empty() {
            return Vec::new();
        }
        let query = self.vectorize(text);

        let mut hits: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(&query, v)))
            .filter(|(_, s)| *s > self.config.noise_floor)
            .collect();

        hits.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.docs[b.0].date.cmp(&self.docs[a.0].date))
                .then_with(|| self.docs[a.0].id.cmp(&self.docs[b.0].id))
        });
        hits.truncate(self.config.top_k);

        hits.into_iter()
            .map(|(position, similarity)| SimilarityMatch {
                position,
                case_id: self.docs[position].id.clone(),
                similarity: similarity.clamp(0.0, 1.0),
            })
            .collect()
    }

    fn weigh(&self, tokens: &[String]) -> Vec<f64> {
        let mut v = vec![0.0; self.vocabulary.len()];
        for t in tokens {
            if let Some(&col) = self.vocabulary.get(t) {
                v[col] += 1.0;
            }
        }
        for (x, idf) in v.iter_mut().zip(&self.idf) {
            *x *= idf;
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, day: u32, text: &str) -> Document {
        Document {
            id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            text: text.to_string(),
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            doc("C1", 1, "Pricing Error stale vendor price Bond"),
            doc("C2", 2, "FX Rate Mismatch fx snapshot timing Cash"),
            doc("C3", 3, "Accrued Interest Mismatch day count convention Bond"),
            doc("C4", 4, "Pricing Error corporate action not applied Equity"),
        ]
    }

    #[test]
    fn tokenizer_drops_single_chars_and_lowercases() {
        assert_eq!(tokenize("FX a Rate-Mismatch 0.25"), ["fx", "rate", "mismatch", "25"]);
    }

    #[test]
    fn self_similarity_is_one() {
        let idx = SimilarityIndex::fit(SimilarityConfig::default(), corpus()).unwrap();
        for (i, d) in corpus().iter().enumerate() {
            assert!((idx.similarity(&d.text, i) - 1.0).abs() < 1e-9);
        }
        let hits = idx.search("Pricing Error stale vendor price Bond");
        assert_eq!(hits[0].case_id, "C1");
        assert!((hits[0].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_corpus_returns_no_matches() {
        let idx = SimilarityIndex::fit(SimilarityConfig::default(), Vec::new()).unwrap();
        assert_eq!(idx.vocabulary_len(), 0);
        assert!(idx.search("Bond Pricing Error").is_empty());
    }

    #[test]
    fn unseen_terms_are_ignored() {
        let idx = SimilarityIndex::fit(SimilarityConfig::default(), corpus()).unwrap();
        let vocab = idx.vocabulary_len();
        assert!(idx.search("zebra quokka").is_empty());
        let a = idx.vectorize("Pricing Error");
        let b = idx.vectorize("Pricing Error zebra");
        assert_eq!(a, b);
        assert_eq!(idx.vocabulary_len(), vocab);
    }

    #[test]
    fn ties_prefer_most_recent_case() {
        let docs = vec![
            doc("OLD", 1, "Fee Mismatch fee accrual Fund"),
            doc("NEW", 9, "Fee Mismatch fee accrual Fund"),
            doc("MID", 5, "Fee Mismatch fee accrual Fund"),
        ];
        let idx = SimilarityIndex::fit(SimilarityConfig::default(), docs).unwrap();
        let ids: Vec<_> = idx
            .search("Fund Fee Mismatch")
            .into_iter()
            .map(|m| m.case_id)
            .collect();
        assert_eq!(ids, ["NEW", "MID", "OLD"]);
    }

    #[test]
    fn results_are_capped_and_ordered() {
        let cfg = SimilarityConfig {
            top_k: 2,
            ..Default::default()
        };
        let idx = SimilarityIndex::fit(cfg, corpus()).unwrap();
        let hits = idx.search("Bond Pricing Error");
        assert_eq!(hits.len(), 2);
        assert!(hits[0].similarity >= hits[1].similarity);
        assert_eq!(hits[0].case_id, "C1");
    }

    #[test]
    fn vocabulary_is_capped() {
        let cfg = SimilarityConfig {
            max_features: 3,
            ..Default::default()
        };
        let idx = SimilarityIndex::fit(cfg, corpus()).unwrap();
        assert_eq!(idx.vocabulary_len(), 3);
    }
}
