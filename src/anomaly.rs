//! # Anomaly Detector
//! Isolation forest over the 3-dimensional anomaly feature space.
//!
//! Each tree isolates points of a random sub-sample by recursive random cuts
//! (random feature, random cut value between that feature's min and max).
//! Points that need fewer cuts to isolate are more anomalous.
//!
//! Score convention: `score = -2^(-E[h(x)] / c(psi))`, so scores lie in [-1, 0)
//! and LOWER means MORE anomalous. The anomaly threshold is the `contamination`
//! quantile of the training scores, computed once at fit time.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::config::AnomalyConfig;
use crate::error::{EngineError, Result};
use crate::features::N_FEATURES;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Outcome for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyScore {
    pub is_anomaly: bool,
    /// Lower = more anomalous.
    pub score: f64,
}

impl AnomalyScore {
    /// Display scale 0..10 (higher = more anomalous).
    pub fn severity(&self) -> f64 {
        (-self.score * 10.0).clamp(0.0, 10.0)
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    model: Option<IsolationForest>,
}

#[derive(Debug, Clone)]
struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

impl AnomalyDetector {
    /// Rejects invalid parameters up front.
    pub fn new(config: AnomalyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model: None,
        })
    }

    /// Score threshold fixed at fit time (`None` before fit).
    pub fn threshold(&self) -> Option<f64> {
        self.model.as_ref().map(|m| m.threshold)
    }

    /// Fit on the reference population. Deterministic for a given seed and input order.
    pub fn fit(&mut self, population: &[[f64; N_FEATURES]]) -> Result<()> {
        if population.is_empty() {
            return Err(EngineError::data(
                "anomaly detector",
                "training population is empty",
            ));
        }
        if population.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EngineError::data(
                "anomaly detector",
                "training population contains non-finite values",
            ));
        }

        let n = population.len();
        let psi = self.config.max_samples.min(n);
        let height_limit = ((psi as f64).log2().ceil() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let trees = (0..self.config.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, n, psi).into_vec();
                IsolationTree::grow(population, &sample, height_limit, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            sample_size: psi,
            threshold: 0.0,
        };

        let mut scores: Vec<f64> = population.iter().map(|x| forest.score(x)).collect();
        scores.sort_by(|a, b| a.total_cmp(b));
        forest.threshold = percentile(&scores, self.config.contamination);

        debug!(
            target: "engine",
            population = n,
            sample_size = psi,
            trees = self.config.n_estimators,
            threshold = forest.threshold,
            "isolation forest fitted"
        );
        self.model = Some(forest);
        Ok(())
    }

    pub fn score(&self, x: &[f64; N_FEATURES]) -> Result<AnomalyScore> {
        let model = self
            .model
            .as_ref()
            .ok_or(EngineError::ModelNotTrained("anomaly detector"))?;
        let score = model.score(x);
        Ok(AnomalyScore {
            is_anomaly: score < model.threshold,
            score,
        })
    }
}

impl IsolationForest {
    fn score(&self, x: &[f64; N_FEATURES]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        let mean = total / self.trees.len().max(1) as f64;
        let c = average_path_length(self.sample_size);
        let c = if c > 0.0 { c } else { 1.0 };
        -(2f64).powf(-mean / c)
    }
}

impl IsolationTree {
    fn grow(
        data: &[[f64; N_FEATURES]],
        sample: &[usize],
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut nodes = Vec::with_capacity(2 * sample.len());
        build(&mut nodes, data, sample, 0, height_limit, rng);
        Self { nodes }
    }

    fn path_length(&self, x: &[f64; N_FEATURES]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(size),
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    node = if x[feature] < value { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn build(
    nodes: &mut Vec<Node>,
    data: &[[f64; N_FEATURES]],
    idx: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> usize {
    let id = nodes.len();
    nodes.push(Node::Leaf { size: idx.len() });
    if depth >= height_limit || idx.len() <= 1 {
        return id;
    }

    // Random feature among those that still vary within this node.
    let mut features: Vec<usize> = (0..N_FEATURES).collect();
    features.shuffle(rng);
    let candidate = features.into_iter().find_map(|f| {
        let (lo, hi) = idx.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(data[i][f]), hi.max(data[i][f]))
        });
        (hi > lo).then_some((f, lo, hi))
    });
    let Some((feature, lo, hi)) = candidate else {
        return id;
    };

    let value = rng.random_range(lo..hi);
    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
        idx.iter().partition(|&&i| data[i][feature] < value);

    let left = build(nodes, data, &left_idx, depth + 1, height_limit, rng);
    let right = build(nodes, data, &right_idx, depth + 1, height_limit, rng);
    nodes[id] = Node::Split {
        feature,
        value,
        left,
        right,
    };
    id
}

/// Average path length of an unsuccessful BST search over `n` points, c(n).
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile of an ascending slice, `q` in [0, 1].
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
