//! # Root-Cause Classifier
//! Random forest predicting a difference-type label from the classifier feature vector
//! (`[|difference|, |difference_pct|, asset_class index]`).
//!
//! - Bagging: every tree sees a bootstrap sample (with replacement) of the training set.
//! - At each split a random subset of `ceil(sqrt(N_FEATURES))` features is searched.
//! - Splits minimise weighted Gini impurity; thresholds sit halfway between adjacent values
//!   and samples with `x <= threshold` go left.
//! - Leaves keep the class distribution; the forest averages the distributions and the
//!   confidence is the winning class's mean probability.
//! - Labels are indexed in sorted order; argmax ties go to the lowest index.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::{EngineError, Result};
use crate::features::N_FEATURES;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// Mean forest probability of `label`, in [0, 1].
    pub confidence: f64,
    pub class_index: usize,
}

#[derive(Debug, Clone)]
pub struct RootCauseClassifier {
    config: ClassifierConfig,
    model: Option<Forest>,
}

#[derive(Debug, Clone)]
struct Forest {
    labels: Vec<String>,
    trees: Vec<Tree>,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Shared, read-only inputs while growing one tree.
struct GrowCtx<'a> {
    x: &'a [[f64; N_FEATURES]],
    y: &'a [usize],
    n_classes: usize,
    max_depth: usize,
    min_samples_split: usize,
    max_features: usize,
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl RootCauseClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model: None,
        })
    }

    /// Known labels in index order (empty before fit).
    pub fn labels(&self) -> &[String] {
        self.model.as_ref().map(|m| m.labels.as_slice()).unwrap_or(&[])
    }

    pub fn fit(&mut self, features: &[[f64; N_FEATURES]], labels: &[String]) -> Result<()> {
        if features.is_empty() {
            return Err(EngineError::data("classifier", "training set is empty"));
        }
        if features.len() != labels.len() {
            return Err(EngineError::data(
                "classifier",
                format!(
                    "{} feature rows but {} labels",
                    features.len(),
                    labels.len()
                ),
            ));
        }
        if features.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EngineError::data(
                "classifier",
                "training features contain non-finite values",
            ));
        }

        let mut classes: Vec<String> = labels.to_vec();
        classes.sort();
        classes.dedup();
        let y: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();

        let ctx = GrowCtx {
            x: features,
            y: &y,
            n_classes: classes.len(),
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            max_features: (N_FEATURES as f64).sqrt().ceil() as usize,
        };

        let n = features.len();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let trees = (0..self.config.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                let mut nodes = Vec::new();
                grow(&ctx, &mut nodes, &bootstrap, 0, &mut rng);
                Tree { nodes }
            })
            .collect();

        debug!(
            target: "engine",
            samples = n,
            classes = classes.len(),
            trees = self.config.n_trees,
            "random forest fitted"
        );
        self.model = Some(Forest {
            labels: classes,
            trees,
        });
        Ok(())
    }

    pub fn predict(&self, x: &[f64; N_FEATURES]) -> Result<Prediction> {
        let model = self
            .model
            .as_ref()
            .ok_or(EngineError::ModelNotTrained("root-cause classifier"))?;

        let mut mean = vec![0.0; model.labels.len()];
        for tree in &model.trees {
            for (acc, p) in mean.iter_mut().zip(tree.distribution(x)) {
                *acc += p;
            }
        }
        let n_trees = model.trees.len().max(1) as f64;
        mean.iter_mut().for_each(|p| *p /= n_trees);

        let class_index = argmax(&mean);
        Ok(Prediction {
            label: model.labels[class_index].clone(),
            confidence: mean[class_index].clamp(0.0, 1.0),
            class_index,
        })
    }
}

impl Tree {
    fn distribution(&self, x: &[f64; N_FEATURES]) -> &[f64] {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                TreeNode::Leaf { distribution } => return distribution,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn grow(ctx: &GrowCtx<'_>, nodes: &mut Vec<TreeNode>, idx: &[usize], depth: usize, rng: &mut StdRng) -> usize {
    let counts = class_counts(ctx, idx);
    let id = nodes.len();
    nodes.push(TreeNode::Leaf {
        distribution: normalize(&counts),
    });

    let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
    if pure || depth >= ctx.max_depth || idx.len() < ctx.min_samples_split {
        return id;
    }

    let Some(best) = best_split(ctx, idx, &counts, rng) else {
        return id;
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
        .iter()
        .partition(|&&i| ctx.x[i][best.feature] <= best.threshold);

    let left = grow(ctx, nodes, &left_idx, depth + 1, rng);
    let right = grow(ctx, nodes, &right_idx, depth + 1, rng);
    nodes[id] = TreeNode::Split {
        feature: best.feature,
        threshold: best.threshold,
        left,
        right,
    };
    id
}

/// Search up to `max_features` non-constant features in random order.
fn best_split(ctx: &GrowCtx<'_>, idx: &[usize], parent: &[usize], rng: &mut StdRng) -> Option<BestSplit> {
    let mut features: Vec<usize> = (0..N_FEATURES).collect();
    features.shuffle(rng);

    let mut best: Option<BestSplit> = None;
    let mut visited = 0;
    for feature in features {
        if visited == ctx.max_features {
            break;
        }
        let mut column: Vec<(f64, usize)> = idx.iter().map(|&i| (ctx.x[i][feature], ctx.y[i])).collect();
        column.sort_by(|a, b| a.0.total_cmp(&b.0));
        if column.first().map(|c| c.0) == column.last().map(|c| c.0) {
            continue;
        }
        visited += 1;

        let n = column.len() as f64;
        let mut left = vec![0usize; ctx.n_classes];
        let mut right = parent.to_vec();
        for i in 0..column.len() - 1 {
            let (value, class) = column[i];
            left[class] += 1;
            right[class] -= 1;
            let next = column[i + 1].0;
            if value >= next {
                continue;
            }
            let n_left = (i + 1) as f64;
            let impurity = (n_left * gini(&left) + (n - n_left) * gini(&right)) / n;
            if best.map_or(true, |b| impurity < b.impurity) {
                let mid = value + (next - value) / 2.0;
                let threshold = if mid >= next { value } else { mid };
                best = Some(BestSplit {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
    }
    best
}

fn class_counts(ctx: &GrowCtx<'_>, idx: &[usize]) -> Vec<usize> {
    let mut counts = vec![0usize; ctx.n_classes];
    for &i in idx {
        counts[ctx.y[i]] += 1;
    }
    counts
}

fn gini(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let t = total as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / t).powi(2)).sum::<f64>()
}

fn normalize(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// Index of the maximum; the first (lowest) index wins ties.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
