// src/config.rs
//! Engine configuration: explicit structs with documented defaults, loaded from TOML.
//!
//! Resolution order for `EngineConfig::load()`:
//! 1) $VALUATION_CONFIG_PATH (must exist)
//! 2) config/engine.toml (optional; defaults when missing)
//!
//! Every section is `#[serde(default)]`, so a partial file only overrides what it names.
//! `validate()` is the single gate for ConfigurationError; constructors call it.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

pub const DEFAULT_ENGINE_CONFIG_PATH: &str = "config/engine.toml";
pub const ENV_ENGINE_CONFIG_PATH: &str = "VALUATION_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub anomaly: AnomalyConfig,
    pub classifier: ClassifierConfig,
    pub similarity: SimilarityConfig,
    pub recommendation: RecommendationConfig,
    pub urgency: UrgencyConfig,
    pub batch: BatchConfig,
    pub data: DataConfig,
    pub server: ServerConfig,
}

/// Isolation forest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected share of anomalies in the training population, in (0, 0.5].
    pub contamination: f64,
    pub n_estimators: usize,
    /// Sub-sample drawn (without replacement) per tree; capped at the population size.
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

/// Random forest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

/// TF-IDF index parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub max_features: usize,
    pub top_k: usize,
    /// Matches at or below this cosine similarity are not reported.
    pub noise_floor: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            max_features: 100,
            top_k: 5,
            noise_floor: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Classifier confidence needed to adopt the predicted type.
    pub confidence_threshold: f64,
    /// The best match must exceed this similarity for its resolution to be reused.
    pub resolution_similarity_bar: f64,
    /// Used when there is no history at all to estimate from.
    pub default_resolution_minutes: u32,
    /// Confidence above which a prediction counts as "high confidence" in batch reports.
    pub high_confidence_mark: f64,
    /// Generic resolution text per difference type; built-ins cover the standard labels.
    pub templates: BTreeMap<String, String>,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            resolution_similarity_bar: 0.3,
            default_resolution_minutes: 60,
            high_confidence_mark: 0.7,
            templates: BTreeMap::new(),
        }
    }
}

/// Percentage bands (absolute difference_pct, in percent) driving urgency.
/// Both marks are strict: a pct equal to a mark falls in the band below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyConfig {
    /// Above this the percentage is "large".
    pub high_pct: f64,
    /// Above this (and up to `high_pct`) the band is medium.
    pub medium_pct: f64,
}

impl Default for UrgencyConfig {
    fn default() -> Self {
        Self {
            high_pct: 1.0,
            medium_pct: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub parallel: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub cases_path: PathBuf,
    pub rules_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            cases_path: PathBuf::from("data/historical_cases.csv"),
            rules_path: PathBuf::from("data/valuation_rules.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: EngineConfig = toml::from_str(toml_str)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing engine config at {}", path.display()))
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(p) = std::env::var(ENV_ENGINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_ENGINE_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_ENGINE_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        self.anomaly.validate()?;
        self.classifier.validate()?;
        self.similarity.validate()?;
        self.recommendation.validate()?;
        self.urgency.validate()
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(EngineError::config(format!(
                "anomaly.contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 {
            return Err(EngineError::config("anomaly.n_estimators must be > 0"));
        }
        if self.max_samples == 0 {
            return Err(EngineError::config("anomaly.max_samples must be > 0"));
        }
        Ok(())
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(EngineError::config("classifier.n_trees must be > 0"));
        }
        if self.max_depth == 0 {
            return Err(EngineError::config("classifier.max_depth must be > 0"));
        }
        if self.min_samples_split < 2 {
            return Err(EngineError::config(
                "classifier.min_samples_split must be >= 2",
            ));
        }
        Ok(())
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(EngineError::config("similarity.max_features must be > 0"));
        }
        if self.top_k == 0 {
            return Err(EngineError::config("similarity.top_k must be > 0"));
        }
        check_unit("similarity.noise_floor", self.noise_floor)
    }
}

impl RecommendationConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit(
            "recommendation.confidence_threshold",
            self.confidence_threshold,
        )?;
        check_unit(
            "recommendation.resolution_similarity_bar",
            self.resolution_similarity_bar,
        )?;
        check_unit(
            "recommendation.high_confidence_mark",
            self.high_confidence_mark,
        )
    }
}

impl UrgencyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.medium_pct.is_finite() && self.high_pct.is_finite()) {
            return Err(EngineError::config("urgency bands must be finite"));
        }
        if self.medium_pct < 0.0 || self.high_pct < 0.0 {
            return Err(EngineError::config("urgency bands must be >= 0"));
        }
        if self.medium_pct > self.high_pct {
            return Err(EngineError::config(format!(
                "urgency.medium_pct ({}) must not exceed urgency.high_pct ({})",
                self.medium_pct, self.high_pct
            )));
        }
        Ok(())
    }
}

fn check_unit(name: &str, v: f64) -> Result<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(EngineError::config(format!("{name} must be in [0, 1], got {v}")))
    }
}
